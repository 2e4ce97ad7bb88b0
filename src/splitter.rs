use crate::constants::{THINK_CLOSE_TAG, THINK_OPEN_TAG};
use crate::str_utils::partial_marker_suffix_len;
use crate::types::{Channel, DemuxOutput};

/// Two-state scanner that routes text fragments to the visible or reasoning
/// channel, switching on complete open/close marker tags.
///
/// State survives across fragments, so a span opened in one `text_delta`
/// message keeps routing to `Reasoning` until a later message closes it.
#[derive(Debug, Clone)]
pub struct TagSplitter {
    open_tag: String,
    close_tag: String,
    hold_partial: bool,
    channel: Channel,
    /// Tail of the last fragment that could still grow into the next marker.
    held: String,
    markers_removed: usize,
}

impl Default for TagSplitter {
    fn default() -> Self {
        Self::new(THINK_OPEN_TAG, THINK_CLOSE_TAG, true)
    }
}

impl TagSplitter {
    pub fn new(open_tag: &str, close_tag: &str, hold_partial: bool) -> Self {
        Self {
            open_tag: open_tag.to_string(),
            close_tag: close_tag.to_string(),
            hold_partial,
            channel: Channel::Visible,
            held: String::new(),
            markers_removed: 0,
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn held(&self) -> &str {
        &self.held
    }

    /// Characters consumed by recognized marker tags so far.
    pub fn markers_removed(&self) -> usize {
        self.markers_removed
    }

    pub fn push(&mut self, fragment: &str, out: &mut DemuxOutput) {
        let mut text = std::mem::take(&mut self.held);
        text.push_str(fragment);
        let mut rest = text.as_str();

        loop {
            let marker = match self.channel {
                Channel::Visible => self.open_tag.as_str(),
                Channel::Reasoning => self.close_tag.as_str(),
            };

            if let Some(idx) = rest.find(marker) {
                out.push_text(self.channel, &rest[..idx]);
                self.markers_removed += marker.chars().count();
                rest = &rest[idx + marker.len()..];
                self.channel = self.channel.toggled();
                tracing::trace!("[SPLIT] switched to {} channel", self.channel);
                continue;
            }

            let hold = if self.hold_partial {
                partial_marker_suffix_len(rest, marker)
            } else {
                0
            };
            let (emit, keep) = rest.split_at(rest.len() - hold);
            out.push_text(self.channel, emit);
            self.held = keep.to_string();
            break;
        }
    }

    /// Releases held text as plain content of the current channel.
    pub fn flush(&mut self, out: &mut DemuxOutput) {
        if !self.held.is_empty() {
            tracing::debug!(
                "[SPLIT] releasing unresolved partial marker {:?} to {} channel",
                self.held,
                self.channel
            );
            let held = std::mem::take(&mut self.held);
            out.push_text(self.channel, &held);
        }
    }
}
