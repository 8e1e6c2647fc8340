use anyhow::{Context, Result, anyhow, bail};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

use super::audit::AuditLog;
use super::config::MembershipConfig;
use super::engine::{MembershipEngine, MembershipView};
use super::protocol::Message;
use super::seed::SeedStore;
use super::transport::Transport;
use super::types::{Lifecycle, MemberStatus, NodeId};

const COMMAND_QUEUE_SIZE: usize = 1024;

/// Everything the engine task reacts to. The loops only ever produce these;
/// the engine task is the single owner of protocol state.
enum Command {
    Inbound { message: Message, from: SocketAddr },
    Probe,
    Sweep,
    Gossip,
    SetSuspicion { enabled: bool, reply: oneshot::Sender<()> },
    Leave { reply: oneshot::Sender<()> },
    View { reply: oneshot::Sender<MembershipView> },
}

/// A running membership node.
///
/// Holds no protocol state itself: it owns the command queue into the engine
/// task, the shared running flag, and the handles of every task it spawned.
pub struct MembershipService {
    pub local_id: NodeId,
    config: MembershipConfig,
    commands: mpsc::Sender<Command>,
    running: watch::Sender<bool>,
    lifecycle: RwLock<Lifecycle>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MembershipService {
    /// Binds the socket, loads the seed table, registers self as Alive and
    /// starts the receive, probe, sweep and gossip loops.
    pub async fn join(
        config: MembershipConfig,
        seeds: &dyn SeedStore,
        audit: Arc<dyn AuditLog>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let transport = Arc::new(Transport::bind(config.bind_addr).await?);
        let local_addr = match config.advertise_addr {
            Some(addr) => addr,
            None => transport.local_addr()?,
        };
        if local_addr.ip().is_unspecified() {
            tracing::warn!(
                "Node id {} is not reachable by peers; set an advertise address",
                local_addr
            );
        }
        let local_id = NodeId::from_addr(local_addr);

        let seed = seeds
            .load_initial_table(&local_id)
            .context("Failed to load initial membership table")?;
        info!("Joining cluster as {} with {} seed entries", local_id, seed.len());

        let engine = MembershipEngine::new(
            local_id.clone(),
            seed,
            &config,
            audit,
            StdRng::from_entropy(),
        );

        let (commands, inbox) = mpsc::channel(COMMAND_QUEUE_SIZE);
        let (running, _) = watch::channel(true);

        let service = Arc::new(Self {
            local_id,
            config,
            commands,
            running,
            lifecycle: RwLock::new(Lifecycle::Joining),
            tasks: Mutex::new(Vec::new()),
        });

        service.start(engine, transport, inbox).await;

        Ok(service)
    }

    async fn start(
        &self,
        engine: MembershipEngine,
        transport: Arc<Transport>,
        inbox: mpsc::Receiver<Command>,
    ) {
        tracing::info!("Starting membership service...");

        let handles = vec![
            tokio::spawn(run_engine(
                engine,
                transport.clone(),
                inbox,
                self.running.subscribe(),
            )),
            self.spawn_receive_loop(transport),
            self.spawn_ticker("probe", self.config.probe_interval, || Command::Probe),
            self.spawn_ticker("sweep", self.config.detector_tick, || Command::Sweep),
            self.spawn_ticker("gossip", self.config.gossip_interval, || Command::Gossip),
        ];

        self.tasks.lock().await.extend(handles);
        *self.lifecycle.write().await = Lifecycle::Running;

        tracing::info!("All background tasks started");
    }

    fn spawn_receive_loop(&self, transport: Arc<Transport>) -> JoinHandle<()> {
        let commands = self.commands.clone();
        let mut running = self.running.subscribe();
        let recv_timeout = self.config.recv_timeout;

        tokio::spawn(async move {
            let mut buf = Transport::buffer();

            loop {
                let received = tokio::select! {
                    received = transport.recv(&mut buf, recv_timeout) => received,
                    _ = stopped(&mut running) => break,
                };

                let Some((message, from)) = received else {
                    continue;
                };
                tracing::debug!("Received {} from {}", message.kind(), from);

                if commands.send(Command::Inbound { message, from }).await.is_err() {
                    break;
                }
            }

            tracing::debug!("Receive loop stopped");
        })
    }

    fn spawn_ticker(
        &self,
        name: &'static str,
        period: Duration,
        command: fn() -> Command,
    ) -> JoinHandle<()> {
        let commands = self.commands.clone();
        let mut running = self.running.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = stopped(&mut running) => break,
                }

                if commands.send(command()).await.is_err() {
                    break;
                }
            }

            tracing::debug!("{} loop stopped", name);
        })
    }

    pub async fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.read().await
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Resolves once leave or shutdown has stopped the node.
    pub async fn wait_stopped(&self) {
        let mut running = self.running.subscribe();
        stopped(&mut running).await;
    }

    pub async fn view(&self) -> Result<MembershipView> {
        let (reply, response) = oneshot::channel();
        self.send(Command::View { reply }).await?;
        response.await.context("Membership engine dropped the request")
    }

    /// The membership table rendered for display.
    pub async fn status(&self) -> Result<String> {
        Ok(self.view().await?.render())
    }

    pub async fn alive_members(&self) -> Result<Vec<NodeId>> {
        Ok(self.view().await?.alive_members())
    }

    pub async fn status_of(&self, id: &NodeId) -> Result<Option<MemberStatus>> {
        Ok(self.view().await?.status_of(id))
    }

    pub async fn set_suspicion(&self, enabled: bool) -> Result<()> {
        let (reply, done) = oneshot::channel();
        self.send(Command::SetSuspicion { enabled, reply }).await?;
        done.await.context("Membership engine dropped the request")
    }

    /// Announces departure to a gossip round of peers, then stops every loop
    /// and releases the socket.
    pub async fn leave(&self) -> Result<()> {
        {
            let mut lifecycle = self.lifecycle.write().await;
            if *lifecycle != Lifecycle::Running {
                bail!("Cannot leave: node is {:?}", *lifecycle);
            }
            *lifecycle = Lifecycle::Leaving;
        }

        let (reply, done) = oneshot::channel();
        let announced = match self.send(Command::Leave { reply }).await {
            Ok(()) => done.await.context("Membership engine dropped the request"),
            Err(e) => Err(e),
        };

        self.stop().await;
        announced?;

        info!("Node {} has left the cluster", self.local_id);
        Ok(())
    }

    /// Stops immediately without telling anyone.
    pub async fn shutdown(&self) {
        if self.lifecycle().await == Lifecycle::Stopped {
            return;
        }

        tracing::warn!("Shutting down {} without leaving", self.local_id);
        self.stop().await;
    }

    async fn stop(&self) {
        self.running.send_replace(false);

        let handles = std::mem::take(&mut *self.tasks.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Membership task failed: {}", e);
            }
        }

        *self.lifecycle.write().await = Lifecycle::Stopped;
        tracing::info!("All background tasks stopped");
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow!("Node {} is not running", self.local_id))
    }
}

/// Resolves once the running flag is cleared or its owner is gone.
async fn stopped(running: &mut watch::Receiver<bool>) {
    let _ = running.wait_for(|running| !*running).await;
}

/// The engine task: applies commands one at a time and ships the resulting
/// datagrams.
async fn run_engine(
    mut engine: MembershipEngine,
    transport: Arc<Transport>,
    mut inbox: mpsc::Receiver<Command>,
    mut running: watch::Receiver<bool>,
) {
    loop {
        let command = tokio::select! {
            biased;
            command = inbox.recv() => match command {
                Some(command) => command,
                None => break,
            },
            _ = stopped(&mut running) => break,
        };

        let outbound = match command {
            Command::Inbound { message, from } => engine.handle_message(message, from),
            Command::Probe => engine.probe(),
            Command::Sweep => {
                engine.sweep();
                Vec::new()
            }
            Command::Gossip => engine.gossip(),
            Command::SetSuspicion { enabled, reply } => {
                engine.set_suspicion(enabled);
                let _ = reply.send(());
                Vec::new()
            }
            Command::Leave { reply } => {
                let farewell = engine.leave();
                for envelope in &farewell {
                    transport.send(envelope).await;
                }
                let _ = reply.send(());
                Vec::new()
            }
            Command::View { reply } => {
                let _ = reply.send(engine.view());
                Vec::new()
            }
        };

        for envelope in &outbound {
            transport.send(envelope).await;
        }
    }

    tracing::debug!("Engine task for {} stopped", engine.local_id());
}
