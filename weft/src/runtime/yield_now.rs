use super::core::Loop;
use super::pool::ContextId;
use crate::error::Result;
use crate::time::wait::Wait;

use tracing::debug;

impl Loop {
    /// Yields execution back to the loop.
    ///
    /// The current evaluation is resumed on the next drain pass, after
    /// everything already queued for immediate resumption.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// for chunk in work {
    ///     process(chunk);
    ///     // Allow other tasks to run
    ///     lp.yield_now().await?;
    /// }
    /// ```
    pub fn yield_now(&self) -> Wait<()> {
        Wait::yielding(self.clone())
    }

    /// Takes an execution context, yielding to the next loop iteration
    /// while none is idle and this iteration's creation quota is used up.
    pub(crate) async fn take_context(&self) -> Result<ContextId> {
        loop {
            let taken = self.pool().try_take();

            if let Some(id) = taken {
                return Ok(id);
            }

            debug!("context quota exhausted, yielding");
            self.yield_now().await?;
        }
    }
}
