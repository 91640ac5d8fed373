//! Per-request context consumed by the audit layer

mod info;
mod remote_ip;

pub(crate) use info::has_query_param;
pub use info::{
    RequestInfo, RequestInfoResolver, SCOPE_CLUSTER, SCOPE_DEVOPS, SCOPE_NAMESPACE,
    SCOPE_WORKSPACE,
};
pub use remote_ip::remote_ip;
