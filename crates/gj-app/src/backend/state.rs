use std::path::PathBuf;

use crate::dispatcher::Dispatcher;

pub struct GenState {
    pub dispatcher: Dispatcher,
    pub examples_dir: Option<PathBuf>,
}

impl GenState {
    pub fn new(dispatcher: Dispatcher, examples_dir: Option<PathBuf>) -> Self {
        Self {
            dispatcher,
            examples_dir,
        }
    }
}
