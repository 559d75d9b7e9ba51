//! Beacon Supabase adapter
//!
//! Connectivity prober and remote settings store for Supabase projects,
//! using the PostgREST API.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Re-exports
pub use beacon_core;

pub mod supabase;

pub use supabase::{
    SupabaseClient, SupabaseConfig, SupabaseProber, SupabaseSettingsStore,
};
