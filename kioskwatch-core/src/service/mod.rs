pub mod presence;
pub mod registry;
pub mod replay;
pub mod signaling;
pub mod token;

pub use presence::{EventSender, PresenceEntry, PresenceMap};
pub use registry::CameraRegistry;
pub use replay::ReplaySet;
pub use signaling::{ClientContext, SignalingService};
pub use token::{ClientClaims, SignedStreamToken, StreamClaims, TokenService, VIEW_PERMISSION};
