use crate::prelude::*;
use async_trait::async_trait;
use easy_ext::ext;
use futures::prelude::*;
use std::time::Instant;

#[ext(FutureExt)]
#[async_trait]
pub(crate) impl<T, E, F> F
where
    F: Future<Output = Result<T, E>> + Send,
    E: std::error::Error + 'static,
{
    /// Logs how long the operation took. Failures are reported at `warn`
    /// level together with the error.
    async fn with_duration_log<'m>(self, msg: &'m str) -> F::Output {
        let start = Instant::now();
        let result = self.await;
        let duration = tracing_duration(start.elapsed());

        match &result {
            Ok(_) => debug!(result = "ok", duration, "{msg}"),
            Err(err) => warn!(result = "err", duration, err = tracing_err(err), "{msg}"),
        }

        result
    }
}
