/// Number of views a multiview prediction must return.
pub const VIEW_COUNT: usize = 6;

/// The fixed camera views of a multiview set, in the order collaborators
/// produce and consume them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalView {
    Front,
    FrontRight,
    Right,
    Back,
    Left,
    FrontLeft,
}

impl CanonicalView {
    /// Name used for scratch files and logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Front => "front",
            Self::FrontRight => "front_right",
            Self::Right => "right",
            Self::Back => "back",
            Self::Left => "left",
            Self::FrontLeft => "front_left",
        }
    }

    /// All views in canonical order
    pub fn all() -> [CanonicalView; VIEW_COUNT] {
        [
            Self::Front,
            Self::FrontRight,
            Self::Right,
            Self::Back,
            Self::Left,
            Self::FrontLeft,
        ]
    }
}
