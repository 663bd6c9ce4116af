//! Plugin host (§4.10): routes inbound service messages to the `AgentPlugin` matching the
//! service's parameter-id namespace, and gives every registered plugin a tick from the timer.
use std::sync::{Arc, Mutex};

use mink_gdt::asn1::{Body, Endpoint, Message};
use mink_gdt::client::Client;
use mink_gdt::service::ServiceMessage;
use mink_gdt::sysagent::{namespace_of, AgentPlugin};

/// Registry of [`AgentPlugin`]s for one `dest_type`. No concrete plugin is registered by
/// default; real plugins (ubus, mqtt, systemd, sqlite auth, cgroup2, lua, sysmon) are out of
/// scope and implement this trait elsewhere.
pub struct PluginHost {
    dest_type: String,
    plugins: Mutex<Vec<Box<dyn AgentPlugin>>>,
}

impl PluginHost {
    pub fn new(dest_type: impl Into<String>) -> PluginHost {
        PluginHost { dest_type: dest_type.into(), plugins: Mutex::new(Vec::new()) }
    }

    pub fn register(&self, plugin: Box<dyn AgentPlugin>) {
        self.plugins.lock().unwrap().push(plugin);
    }

    /// Callback suitable for `SessionEvent::StreamNew`: decodes the inbound service payload,
    /// dispatches to the plugin owning its namespace, and ships any reply back to the
    /// originating peer through `client`.
    pub fn on_stream_new(&self, client: &Arc<Client>, message: Message) {
        if message.header.destination.daemon_type != self.dest_type {
            return;
        }
        let service: ServiceMessage = match message.body {
            Body::Service(service) => service,
            _ => return,
        };

        let namespace = match service.params.iter().next() {
            Some((id, ..)) => namespace_of(id),
            None => return,
        };

        let in_reply_to = message.header.message_id;
        let source: Endpoint = message.header.source;
        let mut plugins = self.plugins.lock().unwrap();
        if let Some(plugin) = plugins.iter_mut().find(|p| p.namespace() == namespace) {
            let mut reply_fn = |reply: ServiceMessage| {
                let _ = client.reply_service(source.clone(), in_reply_to, 0, reply);
            };
            plugin.on_service_message(&service, &mut reply_fn);
        }
    }

    pub fn tick(&self) {
        for plugin in self.plugins.lock().unwrap().iter_mut() {
            plugin.tick();
        }
    }
}
