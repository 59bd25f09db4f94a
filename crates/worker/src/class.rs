/// Execution classes used for task spawning and observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskClass {
	/// A caller-supplied mutation operation.
	Mutation,
	/// Completion bookkeeping for a started mutation.
	Settle,
	/// Periodic full-collection poll driver.
	Poll,
	/// Push channel consumer.
	Push,
}

impl TaskClass {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Mutation => "mutation",
			Self::Settle => "settle",
			Self::Poll => "poll",
			Self::Push => "push",
		}
	}
}
