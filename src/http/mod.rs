pub mod helpers;
mod properties;
pub mod retry;

pub use helpers::{add_query_param, concatenate_uri_path, is_ascii_header_value};
pub use properties::{
    HeadersTransformer, HttpProperties, HttpPropertiesBuilder, ProxySettings,
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_SOCKET_TIMEOUT,
};
pub use retry::{
    is_retryable, with_retry, with_retry_predicate, RetryPolicy, RetryPolicyBuilder, RetryResult,
};
