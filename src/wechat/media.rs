use crate::models::Message;
use std::path::{Path, PathBuf};

/// Resolves on-disk media files for decoded messages by the fixed directory
/// conventions under the account root:
///
/// ```text
/// msg/file/<YYYY-MM>/<filename>                                  files
/// msg/video/<YYYY-MM>/                                           videos
/// cache/<YYYY-MM>/Message/<hash>/Thumb/<local_id>_*_thumb.jpg    image thumbs
/// ```
///
/// Resolution is best-effort: an unresolved ref keeps `path = ""` and the
/// message is emitted anyway.
pub struct MediaResolver {
    root: PathBuf,
}

impl MediaResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        MediaResolver { root: root.into() }
    }

    /// Fills in `path` for every resolvable `MediaRef` of the given
    /// messages. `contact_hash` is the chat-table hash (`Msg_<hash>`).
    pub fn resolve(&self, messages: &mut [Message], contact_hash: &str) {
        for msg in messages {
            if msg.media.is_empty() {
                continue;
            }
            // "2026-01" from the ISO timestamp
            let yyyy_mm = msg.timestamp.get(..7).unwrap_or("").to_string();
            let message_id = msg.message_id.clone();

            for m in &mut msg.media {
                if !m.path.is_empty() {
                    continue;
                }
                match m.kind.as_str() {
                    "file" if !m.filename.is_empty() && !yyyy_mm.is_empty() => {
                        let candidate =
                            self.root.join("msg").join("file").join(&yyyy_mm).join(&m.filename);
                        if candidate.exists() {
                            m.path = candidate.to_string_lossy().into_owned();
                        }
                    }
                    "video" if !yyyy_mm.is_empty() => {
                        // No per-message join exists for videos; when the
                        // month directory holds any .mp4 the ref points at
                        // the directory itself. Consumers must expect a
                        // directory path here.
                        let video_dir = self.root.join("msg").join("video").join(&yyyy_mm);
                        if video_dir.is_dir() && has_mp4(&video_dir) {
                            m.path = video_dir.to_string_lossy().into_owned();
                        }
                    }
                    "image" if !message_id.is_empty() && !yyyy_mm.is_empty() => {
                        if let Some(thumb) =
                            self.find_thumbnail(contact_hash, &yyyy_mm, &message_id)
                        {
                            m.path = thumb.to_string_lossy().into_owned();
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    fn find_thumbnail(&self, contact_hash: &str, yyyy_mm: &str, local_id: &str) -> Option<PathBuf> {
        let thumb_dir = self
            .root
            .join("cache")
            .join(yyyy_mm)
            .join("Message")
            .join(contact_hash)
            .join("Thumb");
        if !thumb_dir.is_dir() {
            return None;
        }
        let pattern = format!("{}/{}_*_thumb.jpg", thumb_dir.to_string_lossy(), local_id);
        glob::glob(&pattern).ok()?.filter_map(|e| e.ok()).next()
    }
}

fn has_mp4(dir: &Path) -> bool {
    let pattern = format!("{}/*.mp4", dir.to_string_lossy());
    glob::glob(&pattern)
        .map(|mut paths| paths.next().is_some())
        .unwrap_or(false)
}
