use async_trait::async_trait;

/// The application's deterministic state machine (§6). The core calls
/// `handle_value` synchronously, in ascending commit order, at most
/// once per `(clientId, requestSerial)` -- the driver's dedup table
/// guarantees that. Implementations must not call back into the Raft
/// API from inside `handle_value`; doing so would reenter the driver
/// while it is mid-step.
#[async_trait]
pub trait StateMachine<V>: Send + Sync {
    async fn handle_value(&self, value: V);
}
