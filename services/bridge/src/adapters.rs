//! Built-in adapter types
//!
//! Hardware-facing adapters plug in from outside; these three ship with the
//! daemon so an installation can be verified end to end without any device
//! attached. `timer` emits a counter, `heartbeat` emits a broadcast event,
//! and `command_echo` consumes host commands and reflects the value back.

use async_trait::async_trait;
use rsp_codec::Command;
use rsp_runtime::{Adapter, AdapterContext, FactoryRegistry, ParameterSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, info};

/// Fallback poll interval when the parameter is absent or unparseable
const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Register all built-in types with a factory registry
pub fn register_builtins(registry: &mut FactoryRegistry) {
    registry.register("timer", || Arc::new(TimerAdapter));
    registry.register("heartbeat", || Arc::new(HeartbeatAdapter));
    registry.register("command_echo", || Arc::new(CommandEchoAdapter));
}

fn poll_interval(ctx: &AdapterContext) -> Duration {
    match ctx.params().get_duration_secs("poll.interval") {
        Ok(Some(interval)) => interval,
        Ok(None) => DEFAULT_INTERVAL,
        Err(_) => {
            ctx.report("poll.interval", "not a number, using default");
            DEFAULT_INTERVAL
        }
    }
}

/// Emits a monotonically increasing counter at a fixed interval
pub struct TimerAdapter;

#[async_trait]
impl Adapter for TimerAdapter {
    fn type_name(&self) -> &'static str {
        "timer"
    }

    fn default_parameters(&self) -> &'static [(&'static str, &'static str)] {
        &[("poll.interval", "1.0")]
    }

    async fn run(&self, ctx: AdapterContext) {
        let interval = poll_interval(&ctx);
        let mut counter: u64 = 0;
        info!(adapter = ctx.name(), interval = ?interval, "timer running");
        while ctx.cancellable_delay(interval).await {
            counter += 1;
            ctx.send_value(counter as f64);
        }
        debug!(adapter = ctx.name(), counter, "timer stopped");
    }
}

/// Emits a broadcast event at a fixed interval
pub struct HeartbeatAdapter;

#[async_trait]
impl Adapter for HeartbeatAdapter {
    fn type_name(&self) -> &'static str {
        "heartbeat"
    }

    fn default_parameters(&self) -> &'static [(&'static str, &'static str)] {
        &[("poll.interval", "5.0"), ("event.name", "heartbeat")]
    }

    async fn run(&self, ctx: AdapterContext) {
        let interval = poll_interval(&ctx);
        info!(adapter = ctx.name(), interval = ?interval, "heartbeat running");
        while ctx.cancellable_delay(interval).await {
            ctx.send_broadcast();
        }
    }
}

/// Reflects inbound host values back as sensor updates
///
/// Consumes its dispatch queue with short non-blocking drains between
/// cancellable sleeps, so a pending deactivation is observed within the
/// cancellation check interval even when no command ever arrives.
pub struct CommandEchoAdapter;

#[async_trait]
impl Adapter for CommandEchoAdapter {
    fn type_name(&self) -> &'static str {
        "command_echo"
    }

    fn mandatory_parameters(&self) -> &'static [&'static str] {
        &["input.name"]
    }

    fn inbound_names(&self, params: &ParameterSet) -> Vec<String> {
        params
            .get("input.name")
            .map(|name| vec![name.to_string()])
            .unwrap_or_default()
    }

    async fn run(&self, ctx: AdapterContext) {
        let Some(mut inbound) = ctx.take_inbound() else {
            ctx.report("inbound", "no inbound queue wired");
            return;
        };
        info!(adapter = ctx.name(), "command echo running");
        while ctx.is_active() {
            loop {
                match inbound.try_recv() {
                    Ok(command) => self.echo(&ctx, command),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return,
                }
            }
            if !ctx.cancellable_delay(Duration::from_millis(50)).await {
                return;
            }
        }
    }
}

impl CommandEchoAdapter {
    fn echo(&self, ctx: &AdapterContext, command: Command) {
        match command {
            Command::SensorUpdate { values } => {
                for pair in values {
                    debug!(adapter = ctx.name(), name = %pair.name, "echoing value");
                    ctx.send_value(pair.value);
                }
            }
            Command::Broadcast { event } => {
                debug!(adapter = ctx.name(), event = %event, "echoing event");
                ctx.send_broadcast();
            }
            Command::Group { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_register_all_types() {
        let mut registry = FactoryRegistry::new();
        register_builtins(&mut registry);
        let mut names = registry.type_names();
        names.sort();
        assert_eq!(names, vec!["command_echo", "heartbeat", "timer"]);
    }

    #[test]
    fn test_command_echo_inbound_names_follow_parameter() {
        let adapter = CommandEchoAdapter;
        let mut params = ParameterSet::new();
        params.set("input.name", "motor_speed");
        assert_eq!(adapter.inbound_names(&params), vec!["motor_speed"]);
        assert!(adapter.inbound_names(&ParameterSet::new()).is_empty());
    }
}
