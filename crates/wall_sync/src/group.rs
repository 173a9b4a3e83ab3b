//! Sync groups
//!
//! A sync group is the ordered list of versioned values reconciled together
//! every frame. Every node must walk the same list in the same order, so the
//! order is defined once, by [`SyncGroup::slots`], and nowhere else.

use crate::message::WallMessage;
use crate::versioned::{SyncKey, SyncSlot, VersionedValue, DEFAULT_MAX_PENDING};
use wall_core::{DisplayGroup, Markers, Options, StreamFrames};

/// An ordered, fixed set of versioned values
pub trait SyncGroup {
    /// The values in synchronization order
    fn slots(&mut self) -> Vec<&mut dyn SyncSlot>;

    /// Keys in synchronization order
    fn keys(&mut self) -> Vec<SyncKey> {
        self.slots().iter().map(|slot| slot.key()).collect()
    }
}

pub const QUIT: SyncKey = SyncKey::new("quit");
pub const DISPLAY_GROUP: SyncKey = SyncKey::new("display_group");
pub const MARKERS: SyncKey = SyncKey::new("markers");
pub const OPTIONS: SyncKey = SyncKey::new("options");
pub const STREAM_FRAMES: SyncKey = SyncKey::new("stream_frames");

/// The state replicated to every wall node
pub struct WallSyncGroup {
    pub quit: VersionedValue<bool>,
    pub display_group: VersionedValue<DisplayGroup>,
    pub markers: VersionedValue<Markers>,
    pub options: VersionedValue<Options>,
    pub stream_frames: VersionedValue<StreamFrames>,
}

impl WallSyncGroup {
    pub fn new(display_group: DisplayGroup, options: Options) -> Self {
        Self::with_max_pending(display_group, options, DEFAULT_MAX_PENDING)
    }

    pub fn with_max_pending(display_group: DisplayGroup, options: Options, max_pending: usize) -> Self {
        Self {
            quit: VersionedValue::new(QUIT, false).with_max_pending(max_pending),
            display_group: VersionedValue::new(DISPLAY_GROUP, display_group)
                .with_max_pending(max_pending),
            markers: VersionedValue::new(MARKERS, Markers::default()).with_max_pending(max_pending),
            options: VersionedValue::new(OPTIONS, options).with_max_pending(max_pending),
            stream_frames: VersionedValue::new(STREAM_FRAMES, StreamFrames::default())
                .with_max_pending(max_pending),
        }
    }

    /// Apply an inbound message as a local update
    pub fn apply(&mut self, message: WallMessage) {
        match message {
            WallMessage::DisplayGroup(group) => {
                self.display_group.update(group);
            }
            WallMessage::Options(options) => {
                self.options.update(options);
            }
            WallMessage::Markers(markers) => {
                self.markers.update(markers);
            }
            WallMessage::StreamFrames(frames) => {
                self.stream_frames.update(frames);
            }
            WallMessage::Quit => {
                self.quit.update(true);
            }
        }
    }

    /// True once the cluster committed the quit flag
    pub fn should_quit(&self) -> bool {
        *self.quit.get()
    }
}

impl SyncGroup for WallSyncGroup {
    fn slots(&mut self) -> Vec<&mut dyn SyncSlot> {
        vec![
            &mut self.quit,
            &mut self.display_group,
            &mut self.markers,
            &mut self.options,
            &mut self.stream_frames,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_order() {
        let mut group = WallSyncGroup::new(DisplayGroup::default(), Options::default());
        assert_eq!(
            group.keys(),
            vec![QUIT, DISPLAY_GROUP, MARKERS, OPTIONS, STREAM_FRAMES]
        );
    }

    #[test]
    fn test_apply_updates_matching_value() {
        let mut group = WallSyncGroup::new(DisplayGroup::default(), Options::default());
        group.apply(WallMessage::Quit);
        group.apply(WallMessage::Options(Options::default()));
        group.apply(WallMessage::Options(Options::default()));

        assert_eq!(group.quit.version(), 1);
        assert_eq!(group.options.version(), 2);
        assert_eq!(group.display_group.version(), 0);
        // Not committed yet
        assert!(!group.should_quit());
    }
}
