use vm_orchestrator::Handlers;

#[derive(Clone)]
pub struct AppState {
    pub handlers: Handlers,
}

impl AppState {
    pub fn new(handlers: Handlers) -> Self {
        Self { handlers }
    }
}
