use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, timeout};

use crate::agents::agent::crossed_stats_threshold;
use crate::agents::{AgentConfig, AgentStatus, AgentSupervisor, ChannelKind, Reply, SupervisorTiming};
use crate::channels::{ChannelConnector, InboxConnector};
use crate::error::{FleetError, Result};
use crate::processing::{InboundMessage, MockProcessingUnit, ProcessingUnit, ProcessingUnitFactory};

/// Millisecond timings so loops tick and stop quickly under test
pub(crate) fn fast_timing() -> SupervisorTiming {
    SupervisorTiming {
        heartbeat_interval: Duration::from_millis(20),
        poll_interval: Duration::from_millis(20),
        init_timeout: Duration::from_millis(200),
        processing_timeout: Duration::from_millis(200),
    }
}

/// Unit that initializes and answers "re: <text>"
pub(crate) fn replying_unit() -> MockProcessingUnit {
    let mut unit = MockProcessingUnit::new();
    unit.expect_initialize().returning(|_| Ok(()));
    unit.expect_process_message()
        .returning(|message| Ok(Some(format!("re: {}", message.text))));
    unit
}

pub(crate) fn rejecting_unit(reason: &'static str) -> MockProcessingUnit {
    let mut unit = MockProcessingUnit::new();
    unit.expect_initialize()
        .returning(move |_| Err(FleetError::ConfigError(reason.to_string())));
    unit.expect_process_message().never();
    unit
}

/// Hands out a prepared unit per agent id; ids without one fail creation.
#[derive(Default)]
pub(crate) struct ScriptedFactory {
    units: Mutex<HashMap<String, Arc<dyn ProcessingUnit>>>,
    panics_for: Option<String>,
}

impl ScriptedFactory {
    pub(crate) fn with_unit(self, agent_id: &str, unit: impl ProcessingUnit + 'static) -> Self {
        if let Ok(mut units) = self.units.lock() {
            units.insert(agent_id.to_string(), Arc::new(unit));
        }
        self
    }

    pub(crate) fn panicking_for(mut self, agent_id: &str) -> Self {
        self.panics_for = Some(agent_id.to_string());
        self
    }
}

impl ProcessingUnitFactory for ScriptedFactory {
    fn create(&self, agent_id: &str, _channel: &ChannelKind) -> Result<Arc<dyn ProcessingUnit>> {
        if self.panics_for.as_deref() == Some(agent_id) {
            panic!("factory blew up for {}", agent_id);
        }
        self.units
            .lock()
            .expect("factory lock")
            .remove(agent_id)
            .ok_or_else(|| FleetError::ConfigError(format!("no credentials for {}", agent_id)))
    }
}

/// Sleeps before answering, for timeout tests
struct SlowUnit {
    init_delay: Duration,
    reply_delay: Duration,
}

#[async_trait]
impl ProcessingUnit for SlowUnit {
    async fn initialize(&self, _config: &AgentConfig) -> Result<()> {
        sleep(self.init_delay).await;
        Ok(())
    }

    async fn process_message(&self, message: &InboundMessage) -> Result<Option<String>> {
        sleep(self.reply_delay).await;
        Ok(Some(message.text.clone()))
    }
}

fn supervisor(id: &str, kind: ChannelKind) -> Arc<AgentSupervisor> {
    Arc::new(AgentSupervisor::new(id, kind, AgentConfig::new(), fast_timing()))
}

async fn running_supervisor(id: &str, kind: ChannelKind, unit: impl ProcessingUnit + 'static) -> (Arc<AgentSupervisor>, tokio::task::JoinHandle<()>) {
    let agent = supervisor(id, kind);
    let factory = ScriptedFactory::default().with_unit(id, unit);
    assert!(agent.initialize(&factory).await);
    let handle = agent.launch(None).await.expect("agent launched");
    (agent, handle)
}

#[tokio::test]
async fn test_new_supervisor_is_unconfigured() {
    let agent = supervisor("slack-1", ChannelKind::ChatEvents);

    let stats = agent.stats().await;
    assert_eq!(stats.id, "slack-1");
    assert_eq!(stats.status, AgentStatus::Unconfigured);
    assert!(!stats.running);
    assert!(!stats.has_processing_unit);
    assert_eq!(stats.message_count, 0);
    assert_eq!(stats.error_count, 0);
}

#[tokio::test]
async fn test_initialize_success_attaches_unit() {
    let agent = supervisor("email-1", ChannelKind::Email);
    let factory = ScriptedFactory::default().with_unit("email-1", replying_unit());

    assert!(agent.initialize(&factory).await);

    let stats = agent.stats().await;
    assert_eq!(stats.status, AgentStatus::Initialized);
    assert!(stats.has_processing_unit);
    assert!(!stats.running);
}

#[tokio::test]
async fn test_initialize_failure_parks_agent() {
    let agent = supervisor("web-1", ChannelKind::WebChat);
    let factory = ScriptedFactory::default().with_unit("web-1", rejecting_unit("api key missing"));

    assert!(!agent.initialize(&factory).await);

    let stats = agent.stats().await;
    assert!(matches!(stats.status, AgentStatus::InitFailed(ref reason) if reason.contains("api key missing")));
    assert!(!stats.has_processing_unit);
    assert!(agent.launch(None).await.is_none());
}

#[tokio::test]
async fn test_initialize_is_attempted_once() {
    let agent = supervisor("api-1", ChannelKind::Api);
    let factory = ScriptedFactory::default().with_unit("api-1", replying_unit());

    assert!(agent.initialize(&factory).await);
    // The factory has nothing left for this id; a second attempt must not ask it
    assert!(agent.initialize(&factory).await);
    assert_eq!(agent.status().await, AgentStatus::Initialized);
}

#[tokio::test]
async fn test_initialize_times_out() {
    let agent = supervisor("email-1", ChannelKind::Email);
    let factory = ScriptedFactory::default().with_unit(
        "email-1",
        SlowUnit {
            init_delay: Duration::from_secs(5),
            reply_delay: Duration::ZERO,
        },
    );

    assert!(!agent.initialize(&factory).await);
    match agent.status().await {
        AgentStatus::InitFailed(reason) => assert!(reason.contains("timed out")),
        other => panic!("expected InitFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_process_message_counts_replies() {
    let (agent, _handle) = running_supervisor("slack-1", ChannelKind::ChatEvents, replying_unit()).await;

    let reply = agent.process_message("hello", "U1", "C1").await;
    assert_eq!(reply, Reply::Text("re: hello".to_string()));

    let stats = agent.stats().await;
    assert_eq!(stats.message_count, 1);
    assert_eq!(stats.error_count, 0);
    assert!(stats.last_message_at.is_some());
    agent.stop();
}

#[tokio::test]
async fn test_process_message_counts_silent_success() {
    let mut unit = MockProcessingUnit::new();
    unit.expect_initialize().returning(|_| Ok(()));
    unit.expect_process_message().times(2).returning(|_| Ok(None));
    let (agent, _handle) = running_supervisor("web-1", ChannelKind::WebChat, unit).await;

    assert!(agent.process_message("ping", "v1", "s1").await.is_no_response());
    assert!(agent.process_message("ping", "v1", "s1").await.is_no_response());

    let stats = agent.stats().await;
    assert_eq!(stats.message_count, 2);
    assert_eq!(stats.error_count, 0);
    agent.stop();
}

#[tokio::test]
async fn test_process_message_failure_is_contained() {
    let mut unit = MockProcessingUnit::new();
    unit.expect_initialize().returning(|_| Ok(()));
    unit.expect_process_message()
        .returning(|_| Err(FleetError::AdapterError("upstream 502".to_string())));
    let (agent, _handle) = running_supervisor("api-1", ChannelKind::Api, unit).await;

    let reply = agent.process_message("order status?", "client-9", "req-1").await;
    assert_eq!(reply, Reply::NoResponse);

    let stats = agent.stats().await;
    assert_eq!(stats.message_count, 0);
    assert_eq!(stats.error_count, 1);
    assert!(stats.running);
    assert!(stats.last_error.as_deref().unwrap_or_default().contains("upstream 502"));
    agent.stop();
}

#[tokio::test]
async fn test_process_message_times_out() {
    let unit = SlowUnit {
        init_delay: Duration::ZERO,
        reply_delay: Duration::from_secs(5),
    };
    let (agent, _handle) = running_supervisor("email-1", ChannelKind::Email, unit).await;

    let reply = agent.process_message("slow one", "a@b.c", "thread-1").await;
    assert!(reply.is_no_response());
    assert_eq!(agent.stats().await.error_count, 1);
    agent.stop();
}

#[tokio::test]
async fn test_process_message_when_not_running() {
    let mut unit = MockProcessingUnit::new();
    unit.expect_initialize().returning(|_| Ok(()));
    unit.expect_process_message().never();

    let agent = supervisor("slack-1", ChannelKind::ChatEvents);
    let factory = ScriptedFactory::default().with_unit("slack-1", unit);
    assert!(agent.initialize(&factory).await);

    // Initialized but not yet running
    assert!(agent.process_message("hi", "U1", "C1").await.is_no_response());

    let stats = agent.stats().await;
    assert_eq!(stats.message_count, 0);
    assert_eq!(stats.error_count, 0);
}

#[tokio::test]
async fn test_launch_marks_running_before_returning() {
    let (agent, handle) = running_supervisor("web-1", ChannelKind::WebChat, replying_unit()).await;

    let stats = agent.stats().await;
    assert!(stats.running);
    assert!(stats.started_at.is_some());

    agent.stop();
    timeout(Duration::from_secs(1), handle)
        .await
        .expect("loop exits after stop")
        .expect("loop did not panic");
    assert_eq!(agent.status().await, AgentStatus::Stopped);
}

#[tokio::test]
async fn test_polling_loop_ticks_until_stopped() {
    let (agent, handle) = running_supervisor("email-1", ChannelKind::Email, replying_unit()).await;

    sleep(Duration::from_millis(80)).await;
    assert!(agent.metrics().await.last_tick_at.is_some());

    agent.stop();
    timeout(Duration::from_secs(1), handle)
        .await
        .expect("polling loop exits")
        .expect("loop did not panic");
    assert_eq!(agent.status().await, AgentStatus::Stopped);
    assert!(agent.process_message("late", "a@b.c", "t").await.is_no_response());
}

#[tokio::test]
async fn test_stop_before_launch_never_runs() {
    let agent = supervisor("api-1", ChannelKind::Api);
    let factory = ScriptedFactory::default().with_unit("api-1", replying_unit());
    assert!(agent.initialize(&factory).await);

    agent.stop();
    assert!(agent.stop_requested());
    assert!(agent.launch(None).await.is_none());
    assert_eq!(agent.status().await, AgentStatus::Stopped);
}

#[tokio::test]
async fn test_unsupported_kind_does_not_launch() {
    let agent = supervisor("sms-1", ChannelKind::from("sms"));
    let factory = ScriptedFactory::default().with_unit("sms-1", replying_unit());
    assert!(agent.initialize(&factory).await);

    assert!(agent.launch(None).await.is_none());
    assert_eq!(agent.status().await, AgentStatus::Initialized);
}

#[tokio::test]
async fn test_inbox_connector_feeds_agent() {
    let agent = supervisor("web-1", ChannelKind::WebChat);
    let factory = ScriptedFactory::default().with_unit("web-1", replying_unit());
    assert!(agent.initialize(&factory).await);

    let (inbox, sender) = InboxConnector::new("web-inbox", 8);
    let inbox = Arc::new(inbox);
    let mut replies = inbox.subscribe_replies();
    let handle = agent
        .launch(Some(inbox.clone() as Arc<dyn ChannelConnector>))
        .await
        .expect("launched");

    sender.send("where is my order?", "visitor-7", "session-3").await.expect("queued");
    let outbound = timeout(Duration::from_secs(1), replies.recv())
        .await
        .expect("reply in time")
        .expect("reply broadcast");

    assert_eq!(outbound.agent_id, "web-1");
    assert_eq!(outbound.contact_id, "visitor-7");
    assert_eq!(outbound.conversation_id, "session-3");
    assert_eq!(outbound.reply.text(), Some("re: where is my order?"));
    assert_eq!(agent.stats().await.message_count, 1);

    agent.stop();
    timeout(Duration::from_secs(1), handle)
        .await
        .expect("loop exits")
        .expect("loop did not panic");
}

#[tokio::test]
async fn test_inbox_binds_once() {
    let (inbox, _sender) = InboxConnector::new("chat", 4);
    let first = supervisor("slack-1", ChannelKind::ChatEvents);
    let second = supervisor("slack-2", ChannelKind::ChatEvents);

    inbox.bind(first).await.expect("first bind");
    let err = inbox.bind(second).await.expect_err("second bind rejected");
    assert!(matches!(err, FleetError::ConnectorError(_)));
}

#[tokio::test]
async fn test_failed_bind_stops_agent() {
    let (inbox, _sender) = InboxConnector::new("chat", 4);
    let inbox = Arc::new(inbox);
    inbox
        .bind(supervisor("other", ChannelKind::ChatEvents))
        .await
        .expect("taken by another agent");

    let agent = supervisor("slack-1", ChannelKind::ChatEvents);
    let factory = ScriptedFactory::default().with_unit("slack-1", replying_unit());
    assert!(agent.initialize(&factory).await);

    let handle = agent
        .launch(Some(inbox as Arc<dyn ChannelConnector>))
        .await
        .expect("launched");
    timeout(Duration::from_secs(1), handle)
        .await
        .expect("loop ends on bind failure")
        .expect("loop did not panic");

    let stats = agent.stats().await;
    assert_eq!(stats.status, AgentStatus::Stopped);
    assert!(stats.last_error.is_some());
}

#[test]
fn test_heartbeat_logs_every_ten_messages() {
    assert!(!crossed_stats_threshold(0, 9));
    assert!(crossed_stats_threshold(0, 10));
    assert!(!crossed_stats_threshold(10, 19));
    assert!(crossed_stats_threshold(10, 20));
    assert!(!crossed_stats_threshold(20, 25));
    // A burst past several multiples still logs once
    assert!(crossed_stats_threshold(9, 25));
}
