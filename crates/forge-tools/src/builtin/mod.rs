//! Built-in tool set. Built-ins are compiled in and bypass approval.

pub mod exec_util;

mod check;
mod commit;
mod compact;
mod delete_file;
mod get_lines;
mod grep_context;
mod grep_open;
mod grep_util;
mod rename_file;
mod scout;
mod search_replace;
mod spawn_session;
mod think;
mod undo_edit;
mod update_context;
mod wait_session;
mod write_file;

use std::sync::Arc;

use crate::Tool;

pub use search_replace::SearchReplace;

/// Every built-in, in schema-listing order.
pub fn all() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(write_file::WriteFile),
        Arc::new(delete_file::DeleteFile),
        Arc::new(rename_file::RenameFile),
        Arc::new(search_replace::SearchReplace),
        Arc::new(get_lines::GetLines),
        Arc::new(update_context::UpdateContext),
        Arc::new(grep_open::GrepOpen),
        Arc::new(grep_context::GrepContext),
        Arc::new(undo_edit::UndoEdit),
        Arc::new(commit::Commit),
        Arc::new(compact::Compact),
        Arc::new(think::Think),
        Arc::new(scout::Scout),
        Arc::new(spawn_session::SpawnSession),
        Arc::new(wait_session::WaitSession),
        Arc::new(check::Check),
        Arc::new(run_tests::RunTests),
    ]
}
