use std::time::Duration;

use ractor::{Actor, ActorProcessingErr, ActorRef};
use ractor_cluster::RactorMessage;
use tokio::task::block_in_place;
use tracing::{debug, warn};

use crate::config::RuntimeConfig;

use super::inbox::{Inbox, Step};
use super::mailman::HttpMailman;
use super::simple_queue::SimpleQueue;

/// Drains the inbox queue, one message at a time. Several workers share the
/// queue; visibility timeouts keep them from processing the same message.
pub(crate) struct InboxWorker;

#[derive(RactorMessage)]
pub(crate) enum InboxWorkerMsg {
    RunLoop,
}

pub(crate) struct InboxWorkerInit {
    pub(crate) config: RuntimeConfig,
}

pub(crate) struct InboxWorkerState {
    inbox: Inbox<HttpMailman>,
}

impl Actor for InboxWorker {
    type Msg = InboxWorkerMsg;
    type State = InboxWorkerState;
    type Arguments = InboxWorkerInit;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let InboxWorkerInit { config } = args;
        block_in_place(|| {
            let timeout = Duration::from_secs(config.init.worker.fetch_timeout_secs);
            let inbox = Inbox::new(&config, HttpMailman::new(timeout)?)?;
            Ok(InboxWorkerState { inbox })
        })
    }
    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        _state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        ractor::cast!(myself, InboxWorkerMsg::RunLoop)?;
        Ok(())
    }
    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            InboxWorkerMsg::RunLoop => {
                let idle_poll = state.inbox.idle_poll();
                match state.inbox.step(SimpleQueue::now()).await {
                    Ok(Step::Idle) => {
                        myself.send_after(idle_poll, || InboxWorkerMsg::RunLoop);
                    }
                    Ok(step) => {
                        debug!(target: "inbox", ?step, "processed");
                        // There might be more work to do, immediately schedule next loop
                        ractor::cast!(myself, InboxWorkerMsg::RunLoop)?;
                    }
                    Err(error) => {
                        warn!(target: "inbox", error = format!("{error:#}"), "inbox loop failed");
                        myself.send_after(idle_poll, || InboxWorkerMsg::RunLoop);
                    }
                }
            }
        }
        Ok(())
    }
}
