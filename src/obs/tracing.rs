// self
use crate::{
	_prelude::*,
	obs::{self, OpKind, OpOutcome},
};

/// Span wrapping one client or limiter operation.
#[derive(Clone, Debug)]
pub struct OpSpan {
	kind: OpKind,
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl OpSpan {
	/// Opens a span tagged with the operation kind and stage.
	pub fn new(kind: OpKind, stage: &'static str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!("api_resilience.op", op = kind.as_str(), stage);

			Self { kind, span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = stage;

			Self { kind }
		}
	}

	/// Drives `fut` inside the span, counting the attempt and its outcome.
	pub async fn observe<T, E, Fut>(self, fut: Fut) -> Result<T, E>
	where
		Fut: Future<Output = Result<T, E>>,
	{
		obs::record_op_outcome(self.kind, OpOutcome::Attempt);

		#[cfg(feature = "tracing")]
		let result = {
			use tracing::Instrument;

			fut.instrument(self.span).await
		};
		#[cfg(not(feature = "tracing"))]
		let result = fut.await;
		let outcome = if result.is_ok() { OpOutcome::Success } else { OpOutcome::Failure };

		obs::record_op_outcome(self.kind, outcome);

		result
	}

	/// Runs a synchronous section inside the span.
	pub fn in_scope<R>(&self, f: impl FnOnce() -> R) -> R {
		#[cfg(feature = "tracing")]
		{
			self.span.in_scope(f)
		}
		#[cfg(not(feature = "tracing"))]
		{
			f()
		}
	}
}
