use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, instrument, trace};

use super::model::LinkEndpoint;
use super::transport::BleTransport;
use crate::error::ExchangeError;
use crate::handlers::{Command, ResponseAssembler};
use crate::protocol::CommandKind;
use crate::utils::format_hex;

/// Where the executor is within the current exchange.
#[derive(Debug, Clone, Copy, Eq, PartialEq, derive_more::Display)]
pub enum ExchangePhase {
    #[display("idle")]
    Idle,
    #[display("sending")]
    Sending,
    #[display("awaiting_response")]
    AwaitingResponse,
}

/// What [`CommandExecutor::on_fragment`] did with a fragment.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FragmentDisposition {
    /// Appended to the outstanding response.
    Consumed,
    /// Nothing was waiting for a response; the fragment is unsolicited.
    Idle,
}

#[derive(Debug)]
enum Completion {
    Response(Vec<u8>),
    Corrupt,
    Cancelled,
}

#[derive(Debug)]
struct PendingExchange {
    id: u64,
    kind: CommandKind,
    phase: ExchangePhase,
    assembler: ResponseAssembler,
    completion: oneshot::Sender<Completion>,
}

impl PendingExchange {
    fn resolve(self, completion: Completion) {
        if self.completion.send(completion).is_err() {
            debug!(kind = %self.kind, "exchange caller went away before completion");
        }
    }
}

/// Clears the exchange it was created for when dropped.
///
/// Covers callers that abandon `execute` mid-flight, so the slot never stays
/// occupied without a timer running against it.
struct ExchangeGuard<'a> {
    executor: &'a CommandExecutor,
    id: u64,
}

impl Drop for ExchangeGuard<'_> {
    fn drop(&mut self) {
        if let Some(exchange) = self.executor.finish(self.id) {
            debug!(kind = %exchange.kind, phase = %exchange.phase, "exchange abandoned by caller");
        }
    }
}

/// Runs one command at a time against the linked characteristic.
pub struct CommandExecutor {
    transport: Arc<dyn BleTransport>,
    chunk_size: usize,
    pending: Mutex<Option<PendingExchange>>,
    next_id: AtomicU64,
}

impl CommandExecutor {
    pub fn new(transport: Arc<dyn BleTransport>, chunk_size: usize) -> Self {
        Self {
            transport,
            chunk_size,
            pending: Mutex::new(None),
            next_id: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<PendingExchange>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn phase(&self) -> ExchangePhase {
        self.lock()
            .as_ref()
            .map_or(ExchangePhase::Idle, |exchange| exchange.phase)
    }

    /// Sends `command` and waits for its full response.
    ///
    /// Chunks are written strictly in order, each awaited before the next.
    /// Commands that expect no response resolve with an empty buffer once
    /// written.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError::Busy`] while another exchange is outstanding,
    /// [`ExchangeError::ResponseTimeout`] or [`ExchangeError::InvalidChecksum`]
    /// for bad responses, [`ExchangeError::Disconnected`] when cancelled, and
    /// transport errors from failed writes. Every error leaves the executor idle,
    /// and so does dropping the returned future before it completes.
    #[instrument(skip(self, endpoint, command), level = "debug", fields(kind = %command.kind()))]
    pub async fn execute(
        &self,
        endpoint: &LinkEndpoint,
        command: &Command,
    ) -> Result<Vec<u8>, ExchangeError> {
        let (id, mut receiver) = self.begin(command)?;
        let _guard = ExchangeGuard { executor: self, id };

        for (index, chunk) in command.chunks(self.chunk_size).iter().enumerate() {
            if !self.is_current(id) {
                break;
            }
            trace!(index, chunk = %format_hex(chunk), "writing chunk");
            if let Err(error) = self.transport.write(endpoint, chunk).await {
                self.finish(id);
                return Err(error.into());
            }
        }

        if command.expected_response_len() == 0 {
            return match self.finish(id) {
                Some(_) => Ok(Vec::new()),
                None => Err(ExchangeError::Disconnected),
            };
        }

        self.mark_awaiting(id);
        let completion = match timeout(command.timeout(), &mut receiver).await {
            Ok(received) => received.ok(),
            Err(_) => {
                if self.finish(id).is_some() {
                    debug!(timeout = ?command.timeout(), "response timed out");
                    return Err(ExchangeError::ResponseTimeout {
                        kind: command.kind(),
                        timeout: command.timeout(),
                    });
                }
                // Resolved between the timer firing and the exchange being cleared.
                receiver.try_recv().ok()
            }
        };

        match completion {
            Some(Completion::Response(bytes)) => Ok(bytes),
            Some(Completion::Corrupt) => Err(ExchangeError::InvalidChecksum {
                kind: command.kind(),
            }),
            Some(Completion::Cancelled) | None => Err(ExchangeError::Disconnected),
        }
    }

    /// Routes an incoming fragment to the outstanding response, if any.
    pub fn on_fragment(&self, fragment: &[u8]) -> FragmentDisposition {
        let mut pending = self.lock();
        let Some(exchange) = pending
            .as_mut()
            .filter(|exchange| exchange.assembler.expected_len() > 0)
        else {
            return FragmentDisposition::Idle;
        };

        exchange.assembler.append(fragment);
        trace!(
            kind = %exchange.kind,
            fragment = %format_hex(fragment),
            received = exchange.assembler.bytes().len(),
            expected = exchange.assembler.expected_len(),
            "response fragment"
        );
        if !exchange.assembler.is_complete() {
            return FragmentDisposition::Consumed;
        }

        if let Some(mut exchange) = pending.take() {
            let assembler = std::mem::take(&mut exchange.assembler);
            let completion = if assembler.is_valid() {
                Completion::Response(assembler.into_bytes())
            } else {
                Completion::Corrupt
            };
            exchange.resolve(completion);
        }
        FragmentDisposition::Consumed
    }

    /// Rejects the outstanding exchange with [`ExchangeError::Disconnected`].
    ///
    /// Returns whether anything was cancelled.
    pub fn cancel(&self) -> bool {
        let Some(exchange) = self.lock().take() else {
            return false;
        };
        debug!(kind = %exchange.kind, phase = %exchange.phase, "cancelling exchange");
        exchange.resolve(Completion::Cancelled);
        true
    }

    fn begin(
        &self,
        command: &Command,
    ) -> Result<(u64, oneshot::Receiver<Completion>), ExchangeError> {
        let mut pending = self.lock();
        if let Some(active) = pending.as_ref() {
            return Err(ExchangeError::Busy {
                active: active.kind,
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (completion, receiver) = oneshot::channel();
        *pending = Some(PendingExchange {
            id,
            kind: command.kind(),
            phase: ExchangePhase::Sending,
            assembler: ResponseAssembler::new(command.expected_response_len()),
            completion,
        });
        Ok((id, receiver))
    }

    fn is_current(&self, id: u64) -> bool {
        self.lock().as_ref().is_some_and(|exchange| exchange.id == id)
    }

    fn mark_awaiting(&self, id: u64) {
        if let Some(exchange) = self.lock().as_mut().filter(|exchange| exchange.id == id) {
            exchange.phase = ExchangePhase::AwaitingResponse;
        }
    }

    fn finish(&self, id: u64) -> Option<PendingExchange> {
        let mut pending = self.lock();
        if pending.as_ref().is_some_and(|exchange| exchange.id == id) {
            pending.take()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use tokio::task::{JoinHandle, yield_now};

    use super::*;
    use crate::handlers::FrameCodec;
    use crate::hw::fake_backend::{FakeBackendConfig, FakeResponseBehaviour, FakeTransport};
    use crate::protocol::TRANSPORT_CHUNK_SIZE;

    const DEVICE_ID: &str = "AA:BB:CC:DD:EE:01";

    fn endpoint() -> LinkEndpoint {
        LinkEndpoint::new(
            DEVICE_ID,
            "0000ffe0-0000-1000-8000-00805f9b34fb",
            "0000ffe1-0000-1000-8000-00805f9b34fb",
        )
    }

    async fn linked_executor() -> (Arc<FakeTransport>, Arc<CommandExecutor>) {
        let transport = Arc::new(FakeTransport::new(
            FakeBackendConfig::builder()
                .behaviour(FakeResponseBehaviour::Silent)
                .build(),
        ));
        transport.open_adapter().await.expect("adapter should open");
        transport
            .create_link(DEVICE_ID, Duration::from_secs(1))
            .await
            .expect("link should come up");
        let executor = Arc::new(CommandExecutor::new(
            transport.clone(),
            TRANSPORT_CHUNK_SIZE,
        ));
        (transport, executor)
    }

    async fn spawn_execute(
        executor: &Arc<CommandExecutor>,
        command: Command,
    ) -> JoinHandle<Result<Vec<u8>, ExchangeError>> {
        let task = {
            let executor = executor.clone();
            tokio::spawn(async move { executor.execute(&endpoint(), &command).await })
        };
        while executor.phase() != ExchangePhase::AwaitingResponse {
            yield_now().await;
        }
        task
    }

    fn get_lab() -> Command {
        Command::get_lab(0).expect("lab command should frame")
    }

    fn lab_response() -> Vec<u8> {
        let mut response = vec![0u8; 20];
        response[..3].copy_from_slice(&[0xBB, 0x03, 0x00]);
        response[5..9].copy_from_slice(&50.0f32.to_le_bytes());
        FrameCodec::apply_sign(&mut response);
        response
    }

    #[tokio::test]
    async fn fragments_assemble_into_the_response() {
        let (transport, executor) = linked_executor().await;
        let task = spawn_execute(&executor, get_lab()).await;
        let response = lab_response();

        assert_eq!(FragmentDisposition::Consumed, executor.on_fragment(&response[..7]));
        assert_eq!(FragmentDisposition::Consumed, executor.on_fragment(&response[7..]));

        let received = task.await.expect("task should join");
        assert_eq!(Ok(response), received.map_err(|error| error.to_string()));
        assert_eq!(ExchangePhase::Idle, executor.phase());
        assert_eq!(1, transport.written_chunks().len());
    }

    #[tokio::test]
    async fn corrupt_response_is_rejected() {
        let (_transport, executor) = linked_executor().await;
        let task = spawn_execute(&executor, get_lab()).await;
        let mut response = lab_response();
        response[6] ^= 0x01;

        executor.on_fragment(&response);

        assert_matches!(
            task.await.expect("task should join"),
            Err(ExchangeError::InvalidChecksum {
                kind: CommandKind::GetLab
            })
        );
        assert_eq!(ExchangePhase::Idle, executor.phase());
    }

    #[tokio::test]
    async fn second_command_is_rejected_while_awaiting() {
        let (_transport, executor) = linked_executor().await;
        let task = spawn_execute(&executor, get_lab()).await;

        let busy = executor.execute(&endpoint(), &Command::get_rgb(0).expect("rgb command should frame")).await;

        assert_matches!(
            busy,
            Err(ExchangeError::Busy {
                active: CommandKind::GetLab
            })
        );
        executor.on_fragment(&lab_response());
        assert!(task.await.expect("task should join").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_instrument_times_out() {
        let (_transport, executor) = linked_executor().await;

        let result = executor.execute(&endpoint(), &get_lab()).await;

        assert_matches!(
            result,
            Err(ExchangeError::ResponseTimeout {
                kind: CommandKind::GetLab,
                timeout,
            }) if timeout == Duration::from_millis(1500)
        );
        assert_eq!(ExchangePhase::Idle, executor.phase());
        assert_eq!(FragmentDisposition::Idle, executor.on_fragment(&lab_response()));
    }

    #[tokio::test]
    async fn cancel_rejects_the_outstanding_exchange() {
        let (_transport, executor) = linked_executor().await;
        let task = spawn_execute(&executor, get_lab()).await;

        assert!(executor.cancel());

        assert_matches!(
            task.await.expect("task should join"),
            Err(ExchangeError::Disconnected)
        );
        assert!(!executor.cancel());
    }

    #[tokio::test]
    async fn wake_resolves_once_written() {
        let (transport, executor) = linked_executor().await;

        let result = executor.execute(&endpoint(), &Command::wake()).await;

        assert_matches!(result, Ok(bytes) if bytes.is_empty());
        assert_eq!(vec![vec![0xF0]], transport.written_chunks());
        assert_eq!(ExchangePhase::Idle, executor.phase());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_exchange_frees_the_executor() {
        let (transport, executor) = linked_executor().await;

        let abandoned = timeout(
            Duration::from_millis(200),
            executor.execute(&endpoint(), &get_lab()),
        )
        .await;

        assert!(abandoned.is_err());
        assert_eq!(ExchangePhase::Idle, executor.phase());
        let woken = executor.execute(&endpoint(), &Command::wake()).await;
        assert_matches!(woken, Ok(bytes) if bytes.is_empty());
        assert_eq!(2, transport.written_chunks().len());
    }

    #[tokio::test]
    async fn fragments_without_a_waiting_command_are_unsolicited() {
        let (_transport, executor) = linked_executor().await;

        assert_eq!(FragmentDisposition::Idle, executor.on_fragment(&[0xBB, 0x01]));
    }

    #[tokio::test]
    async fn write_failure_leaves_the_executor_idle() {
        let (transport, executor) = linked_executor().await;
        transport.drop_link();

        let result = executor.execute(&endpoint(), &get_lab()).await;

        assert_matches!(result, Err(ExchangeError::Transport(_)));
        assert_eq!(ExchangePhase::Idle, executor.phase());
    }
}
