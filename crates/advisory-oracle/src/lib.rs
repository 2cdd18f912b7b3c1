pub mod cache;
pub mod error;
pub mod http;
pub mod models;
pub mod parser;

pub use cache::CachedOracle;
pub use error::{OracleError, OracleResult};
pub use http::{HttpOracle, OracleConfig};
pub use models::{CorrelationContext, OracleDecision, OracleRequest, PermissivenessLevel};
pub use parser::{parse_decision, strip_code_fences};

use async_trait::async_trait;

/// External approve/reject authority consulted as the last gatekeeper step.
///
/// Implementations are untrusted: any error is treated by the caller as a
/// rejection with zero confidence.
#[async_trait]
pub trait AdvisoryOracle: Send + Sync {
    async fn consult(&self, request: &OracleRequest) -> OracleResult<OracleDecision>;

    fn oracle_name(&self) -> &str;
}

#[async_trait]
impl<T: AdvisoryOracle + ?Sized> AdvisoryOracle for Box<T> {
    async fn consult(&self, request: &OracleRequest) -> OracleResult<OracleDecision> {
        (**self).consult(request).await
    }

    fn oracle_name(&self) -> &str {
        (**self).oracle_name()
    }
}
