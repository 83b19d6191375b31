/// Fire-and-forget hook run after a project's watch is installed.
pub trait ExternalNotifier: Send + Sync {
    fn notify(&self, project_id: &str, local_root: &str, creation_time_millis: Option<u64>);
}
