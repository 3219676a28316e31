use core_model::{FrameId, NodeId, ValueCell};

/// An activation record: static link, dynamic link, the node that opened
/// it, an optional non-local-jump catcher, and zero-filled local storage
/// sized by the lexical level's `ap_increment`.
#[derive(Debug)]
pub struct Frame {
    pub static_link: Option<FrameId>,
    pub dynamic_link: Option<FrameId>,
    pub node: NodeId,
    pub level: u32,
    pub catcher: Option<NodeId>,
    pub locals: Vec<ValueCell>,
}

impl Frame {
    pub fn new(
        static_link: Option<FrameId>,
        dynamic_link: Option<FrameId>,
        node: NodeId,
        level: u32,
        local_count: usize,
    ) -> Self {
        Self {
            static_link,
            dynamic_link,
            node,
            level,
            catcher: None,
            locals: vec![ValueCell::uninitialised(core_model::ValueData::Void); local_count],
        }
    }
}

/// Which relationship a newly opened lexical level has to the currently
/// executing frame, per the static-link selection rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelRelation {
    /// `L' == L`: same parent as the current frame.
    Peer,
    /// `L' > L`: the current frame becomes the static link.
    Child,
    /// `L' < L`: walk static links until a frame whose level is `>= L'`.
    AncestorWard,
}

pub fn relation(current_level: u32, new_level: u32) -> LevelRelation {
    if new_level == current_level {
        LevelRelation::Peer
    } else if new_level > current_level {
        LevelRelation::Child
    } else {
        LevelRelation::AncestorWard
    }
}
