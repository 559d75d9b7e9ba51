//! Live Supabase tests
//!
//! These tests require a reachable Supabase project.
//! Set SUPABASE_URL and SUPABASE_ANON_KEY to run them.
//!
//! Run with: cargo test -p beacon-storage-supabase --test supabase_live -- --ignored

use beacon_core::{Configuration, ConnectivityProber, Credentials, RemoteSettingsStore, SETTING_KEYS};
use beacon_storage_supabase::{SupabaseProber, SupabaseSettingsStore};

fn live_configuration() -> Option<Configuration> {
    let url = std::env::var("SUPABASE_URL").ok()?;
    let key = std::env::var("SUPABASE_ANON_KEY").ok()?;
    Some(Configuration::new(url, key))
}

#[tokio::test]
#[ignore = "Requires Supabase project"]
async fn test_live_probe() {
    let Some(config) = live_configuration() else {
        eprintln!("Skipping test - SUPABASE_URL/SUPABASE_ANON_KEY not set");
        return;
    };

    let result = SupabaseProber::new()
        .with_permission_check("system_settings")
        .probe(&config)
        .await;
    assert!(result.is_connected, "probe failed: {:?}", result);
}

#[tokio::test]
#[ignore = "Requires Supabase project"]
async fn test_live_rejects_wrong_key() {
    let Some(config) = live_configuration() else {
        eprintln!("Skipping test - SUPABASE_URL/SUPABASE_ANON_KEY not set");
        return;
    };

    let wrong = Configuration::new(config.url, "not-a-real-key");
    let result = SupabaseProber::new().probe(&wrong).await;
    assert!(!result.is_connected);
    assert_eq!(result.error_code.as_deref(), Some("auth_error"));
}

#[tokio::test]
#[ignore = "Requires Supabase project"]
async fn test_live_fetch_settings() {
    let Some(config) = live_configuration() else {
        eprintln!("Skipping test - SUPABASE_URL/SUPABASE_ANON_KEY not set");
        return;
    };

    let credentials = Credentials::new(config.url, config.anon_key);
    let store = SupabaseSettingsStore::new("system_settings");
    match store.fetch_settings(&credentials, SETTING_KEYS).await {
        Ok(rows) => assert!(rows.iter().all(|r| SETTING_KEYS.contains(&r.key.as_str()))),
        Err(e) => eprintln!("Settings table not readable with the anon key: {}", e),
    }
}
