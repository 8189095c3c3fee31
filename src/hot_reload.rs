// Shader hot reload
//
// A notify watcher on the shader directory forwards events over a channel.
// The render loop drains it once per frame and never blocks.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::mpsc::{channel, Receiver, TryRecvError};

pub struct ShaderWatcher {
    // Dropping the watcher stops the background thread
    _watcher: RecommendedWatcher,
    events: Receiver<notify::Result<Event>>,
}

impl ShaderWatcher {
    pub fn new(shader_dir: &Path) -> Result<Self> {
        let (tx, events) = channel();

        let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            // Receiver gone means the app is shutting down
            let _ = tx.send(event);
        })
        .context("Failed to create shader watcher")?;

        watcher
            .watch(shader_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {:?}", shader_dir))?;

        log::info!("Watching {:?} for shader changes", shader_dir);

        Ok(Self {
            _watcher: watcher,
            events,
        })
    }

    /// True if any compiled shader changed since the last call
    pub fn poll_changed(&self) -> bool {
        let mut changed = false;
        loop {
            match self.events.try_recv() {
                Ok(Ok(event)) => changed |= is_shader_change(&event),
                Ok(Err(e)) => log::warn!("Shader watcher error: {}", e),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    log::warn!("Shader watcher stopped");
                    break;
                }
            }
        }
        changed
    }
}

/// A create or modify event touching a .spv file
pub fn is_shader_change(event: &Event) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|path| path.extension().is_some_and(|ext| ext == "spv"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};
    use std::path::PathBuf;

    #[test]
    fn only_spirv_writes_count() {
        let spv = PathBuf::from("shaders/scene.frag.spv");
        let glsl = PathBuf::from("shaders/scene.frag");

        let modified = Event::new(EventKind::Modify(ModifyKind::Any)).add_path(spv.clone());
        assert!(is_shader_change(&modified));

        let created = Event::new(EventKind::Create(CreateKind::File)).add_path(spv.clone());
        assert!(is_shader_change(&created));

        let source = Event::new(EventKind::Modify(ModifyKind::Any)).add_path(glsl);
        assert!(!is_shader_change(&source));

        let removed = Event::new(EventKind::Remove(RemoveKind::File)).add_path(spv);
        assert!(!is_shader_change(&removed));
    }
}
