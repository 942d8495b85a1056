//! `CallControl` tool sink (§6): invoked by the pipeline at tool-call time,
//! after the response boundary (§4.6). Errors surface as an error control
//! message; they never roll back already-dispatched audio.

use async_trait::async_trait;

use crate::error::AspResult;

#[async_trait]
pub trait CallControl: Send + Sync {
    async fn transfer(&self, channel_id: &str, destination: &str) -> AspResult<()>;

    async fn hangup(&self, channel_id: &str) -> AspResult<()>;
}

/// Reference `CallControl`: logs the invocation and always succeeds.
pub struct NoopCallControl;

#[async_trait]
impl CallControl for NoopCallControl {
    async fn transfer(&self, channel_id: &str, destination: &str) -> AspResult<()> {
        log::info!("[CallControl] transfer {} -> {}", channel_id, destination);
        Ok(())
    }

    async fn hangup(&self, channel_id: &str) -> AspResult<()> {
        log::info!("[CallControl] hangup {}", channel_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_call_control_always_succeeds() {
        let cc = NoopCallControl;
        assert!(cc.transfer("call-1", "+15551234567").await.is_ok());
        assert!(cc.hangup("call-1").await.is_ok());
    }
}
