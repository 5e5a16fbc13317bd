use std::future::Future;

/// Ids attached to every log line emitted while a sign-in attempt runs.
#[derive(Debug, Clone, Default)]
pub struct FlowContext {
    pub correlation_id: Option<String>,
    pub attempt_id: Option<String>,
}

impl FlowContext {
    pub fn for_attempt() -> Self {
        Self {
            correlation_id: None,
            attempt_id: Some(uuid::Uuid::new_v4().to_string()),
        }
    }
}

tokio::task_local! {
    static CURRENT: FlowContext;
}

pub async fn with_flow_context<F, T>(ctx: FlowContext, fut: F) -> T
where
    F: Future<Output = T>,
{
    CURRENT.scope(ctx, fut).await
}

pub fn try_get() -> Option<FlowContext> {
    CURRENT.try_with(|ctx| ctx.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_context_visible_inside_scope_only() {
        assert!(try_get().is_none());
        let ctx = FlowContext {
            correlation_id: Some("corr-1".to_string()),
            attempt_id: Some("attempt-1".to_string()),
        };
        let seen = with_flow_context(ctx, async { try_get() }).await;
        assert_eq!(seen.unwrap().attempt_id.as_deref(), Some("attempt-1"));
        assert!(try_get().is_none());
    }
}
