use async_trait::async_trait;
use tracing::debug;

/// One way of turning an input into an output. `None` means "no answer,
/// ask the next one".
#[async_trait]
pub trait Strategy<I: Sync + ?Sized, O>: Send + Sync {
    fn name(&self) -> &'static str;

    async fn attempt(&self, input: &I) -> Option<O>;
}

/// Try `strategies` in order and return the first answer along with the
/// name of the strategy that gave it
pub async fn first_success<I, O>(
    strategies: &[Box<dyn Strategy<I, O>>],
    input: &I,
) -> Option<(&'static str, O)>
where
    I: Sync + ?Sized,
{
    for strategy in strategies {
        match strategy.attempt(input).await {
            Some(output) => {
                debug!(strategy = strategy.name(), "Strategy succeeded");
                return Some((strategy.name(), output));
            }
            None => debug!(strategy = strategy.name(), "Strategy gave no answer"),
        }
    }
    None
}
