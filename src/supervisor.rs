use anyhow::Result;
use ractor::{Actor, ActorProcessingErr, ActorRef, SupervisionEvent};
use ractor_cluster::RactorMessage;
use tracing::info;

use crate::activity_pub::{InboxWorker, InboxWorkerInit, InboxWorkerMsg};
use crate::config::RuntimeConfig;

pub(crate) struct Supervisor;

#[derive(RactorMessage)]
pub(crate) enum SupervisorMsg {}

pub(crate) struct SupervisorState {
    config: RuntimeConfig,
    myself: ActorRef<SupervisorMsg>,
}

impl Actor for Supervisor {
    type Msg = SupervisorMsg;
    type State = SupervisorState;
    type Arguments = RuntimeConfig;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        config: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        Ok(SupervisorState { config, myself })
    }

    async fn post_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let concurrency = state.config.init.worker.concurrency.max(1);
        for index in 0..concurrency {
            state.spawn_inbox_worker(index).await?;
        }
        info!(target: "lifecycle", concurrency, "started");
        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        use SupervisionEvent::*;

        match message {
            ActorStarted(_) => {}
            ActorTerminated(_, _, _) => {}
            ActorFailed(actor_cell, error) => {
                if matches!(
                    actor_cell.is_message_type_of::<InboxWorkerMsg>(),
                    Some(true)
                ) {
                    let index = actor_cell
                        .get_name()
                        .and_then(|name| worker_index(&name))
                        .unwrap_or_default();
                    info!(target: "supervision", error, index, "inbox worker crashed, restarting...");
                    state.spawn_inbox_worker(index).await?;
                }
            }
            ProcessGroupChanged(_) => {}
            PidLifecycleEvent(_) => {}
        }

        Ok(())
    }
}

impl SupervisorState {
    async fn spawn_inbox_worker(&self, index: usize) -> Result<()> {
        Actor::spawn_linked(
            Some(worker_name(index)),
            InboxWorker,
            InboxWorkerInit {
                config: self.config.clone(),
            },
            self.myself.get_cell(),
        )
        .await?;
        Ok(())
    }
}

fn worker_name(index: usize) -> String {
    format!("inbox_worker_{index}")
}

fn worker_index(name: &str) -> Option<usize> {
    name.strip_prefix("inbox_worker_")?.parse().ok()
}
