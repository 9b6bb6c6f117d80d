// Route modules for Parley Server
pub mod messages; // Message history and recovery
pub mod websocket; // Presence and live relay transport
