//! Invocation of a single node operation.
//!
//! Every operation is wrapped so that it always resolves to an [`OpResult`]:
//! a hung operation becomes [`OpError::Timeout`] and a panicking one becomes
//! [`OpError::Panicked`]. The scheduler therefore always receives exactly one
//! completion per launched operation.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::time;

use crate::node::Op;
use crate::node::behavior::{Handles, NodeContext, OpError, Operations};
use crate::runner::event::OpResult;

/// Build the future for `op`, or `None` if the node has no such operation.
///
/// The slot itself is only called when the future is first polled, so a
/// slot that panics before returning its future is caught by
/// [`run_guarded`] like any other panic.
pub(crate) fn invoke(
    ops: &Operations,
    op: Op,
    ctx: NodeContext,
    handles: Handles,
) -> Option<BoxFuture<'static, OpResult>> {
    match op {
        Op::Start => ops
            .start
            .clone()
            .map(|f| async move { f(ctx).await }.boxed()),
        Op::Run => ops
            .run
            .clone()
            .map(|f| async move { f(ctx, handles).await.map(|()| None) }.boxed()),
        Op::Stop => ops
            .stop
            .clone()
            .map(|f| async move { f(ctx).await.map(|()| None) }.boxed()),
    }
}

/// Await `fut` with an optional timeout, converting panics into errors.
pub(crate) async fn run_guarded(
    fut: BoxFuture<'static, OpResult>,
    timeout: Option<Duration>,
) -> OpResult {
    let guarded = AssertUnwindSafe(fut).catch_unwind();

    let res = if let Some(dur) = timeout.filter(|d| *d > Duration::ZERO) {
        match time::timeout(dur, guarded).await {
            Ok(r) => r,
            Err(_elapsed) => return Err(OpError::Timeout { timeout: dur }),
        }
    } else {
        guarded.await
    };

    res.unwrap_or_else(|payload| {
        Err(OpError::Panicked {
            message: panic_message(payload.as_ref()),
        })
    })
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_through_success() {
        let res = run_guarded(async { Ok(None) }.boxed(), None).await;
        assert!(matches!(res, Ok(None)));
    }

    #[tokio::test]
    async fn passes_through_failure() {
        let res = run_guarded(async { Err(OpError::failed("refused")) }.boxed(), None).await;
        assert_eq!(res.err(), Some(OpError::failed("refused")));
    }

    #[tokio::test]
    async fn times_out_hung_operation() {
        let fut = async {
            time::sleep(Duration::from_secs(3600)).await;
            Ok(None)
        }
        .boxed();
        let res = run_guarded(fut, Some(Duration::from_millis(10))).await;
        assert_eq!(
            res.err(),
            Some(OpError::Timeout {
                timeout: Duration::from_millis(10)
            })
        );
    }

    #[tokio::test]
    async fn zero_timeout_means_unbounded() {
        let res = run_guarded(async { Ok(None) }.boxed(), Some(Duration::ZERO)).await;
        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn converts_panic_into_error() {
        let fut = async {
            if true {
                panic!("socket vanished");
            }
            Ok(None)
        }
        .boxed();
        let res = run_guarded(fut, None).await;
        assert_eq!(
            res.err(),
            Some(OpError::Panicked {
                message: "socket vanished".into()
            })
        );
    }

    fn test_context() -> NodeContext {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        NodeContext::new(
            petgraph::graph::NodeIndex::new(0),
            "t",
            crate::node::NodeKind::Test,
            Handles::default(),
            tokio_util::sync::CancellationToken::new(),
            tx,
        )
    }

    #[test]
    fn absent_slot_yields_nothing() {
        let ctx = test_context();
        assert!(invoke(&Operations::new(), Op::Run, ctx, Handles::default()).is_none());
    }

    #[tokio::test]
    async fn slot_panicking_before_its_future_is_caught() {
        let ops = Operations::new().on_run(|_ctx, _handles| {
            if true {
                panic!("bad fixture");
            }
            async { Ok(()) }
        });
        let fut = invoke(&ops, Op::Run, test_context(), Handles::default())
            .expect("run slot present");
        let res = run_guarded(fut, None).await;
        assert_eq!(
            res.err(),
            Some(OpError::Panicked {
                message: "bad fixture".into()
            })
        );
    }
}
