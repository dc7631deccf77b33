//! Blocking entry points drive the async code paths on a private
//! current-thread runtime, so both paths share one state machine.

use std::future::Future;

use crate::error::{AgentError, Result};

pub(crate) fn block_on<T>(future: impl Future<Output = Result<T>>) -> Result<T> {
    if tokio::runtime::Handle::try_current().is_ok() {
        return Err(AgentError::Config(
            "blocking call made from inside an async runtime; use the async variant".into(),
        ));
    }
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(future)
}
