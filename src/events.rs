use tokio::sync::broadcast;

/// Fan-out events published by handlers, consumed by the webhook dispatcher
/// to decide whether a delivery row should be enqueued at all (scope + event
/// type match). Retry state lives in the `webhook_deliveries` table, not here.
#[derive(Debug, Clone)]
pub enum WorkspaceEvent {
    AppendCreated {
        workspace_id: String,
        file_path: String,
        append_id: String,
        event_name: &'static str,
        payload: serde_json::Value,
    },
    FilePut {
        workspace_id: String,
        file_path: String,
        payload: serde_json::Value,
    },
    FileDeleted {
        workspace_id: String,
        file_path: String,
        payload: serde_json::Value,
    },
}

impl WorkspaceEvent {
    pub fn workspace_id(&self) -> &str {
        match self {
            WorkspaceEvent::AppendCreated { workspace_id, .. } => workspace_id,
            WorkspaceEvent::FilePut { workspace_id, .. } => workspace_id,
            WorkspaceEvent::FileDeleted { workspace_id, .. } => workspace_id,
        }
    }

    pub fn scope_path(&self) -> &str {
        match self {
            WorkspaceEvent::AppendCreated { file_path, .. } => file_path,
            WorkspaceEvent::FilePut { file_path, .. } => file_path,
            WorkspaceEvent::FileDeleted { file_path, .. } => file_path,
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            WorkspaceEvent::AppendCreated { event_name, .. } => event_name,
            WorkspaceEvent::FilePut { .. } => "file.put",
            WorkspaceEvent::FileDeleted { .. } => "file.deleted",
        }
    }

    pub fn payload(&self) -> &serde_json::Value {
        match self {
            WorkspaceEvent::AppendCreated { payload, .. } => payload,
            WorkspaceEvent::FilePut { payload, .. } => payload,
            WorkspaceEvent::FileDeleted { payload, .. } => payload,
        }
    }
}

pub struct EventBus {
    pub sender: broadcast::Sender<WorkspaceEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        EventBus { sender }
    }

    pub fn publish(&self, event: WorkspaceEvent) {
        let _ = self.sender.send(event);
    }
}
