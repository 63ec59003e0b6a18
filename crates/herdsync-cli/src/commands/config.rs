use crate::cli::ConfigCommands;
use herdsync_core::util::normalize_text_option;

use crate::config_profiles::{CliProfile, CliProfilesConfig};
use crate::error::CliError;

pub fn run_config(command: ConfigCommands, global_profile: Option<&str>) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            supabase_url,
            supabase_anon_key,
            realtime_url,
            farm_id,
            no_activate,
        } => {
            let mut config = CliProfilesConfig::load().map_err(CliError::Config)?;
            let profile_name = config.resolve_profile_name(global_profile);
            let updates = CliProfile {
                supabase_url,
                supabase_anon_key,
                realtime_url,
                farm_id,
            };
            let merged = merge_profile(
                config.profile(&profile_name).cloned().unwrap_or_default(),
                updates,
            );
            merged.backend_config()?;

            *config.profile_mut_or_default(&profile_name) = merged;
            if !no_activate || config.active_profile.is_none() {
                config.active_profile = Some(profile_name.clone());
            }
            let path = config.save().map_err(CliError::Config)?;
            println!("Saved profile '{profile_name}' to {}", path.display());
            Ok(())
        }
        ConfigCommands::Show => {
            let config = CliProfilesConfig::load().map_err(CliError::Config)?;
            let profile_name = config.resolve_profile_name(global_profile);
            let Some(profile) = config.profile(&profile_name) else {
                println!("Profile '{profile_name}' is not configured.");
                return Ok(());
            };
            let mut shown = profile.clone();
            if shown.supabase_anon_key.is_some() {
                shown.supabase_anon_key = Some("[REDACTED]".to_string());
            }
            println!("Profile '{profile_name}'");
            println!("{}", serde_json::to_string_pretty(&shown)?);
            Ok(())
        }
    }
}

/// Explicit values win; unset ones keep what the profile already has.
pub fn merge_profile(existing: CliProfile, updates: CliProfile) -> CliProfile {
    CliProfile {
        supabase_url: normalize_text_option(updates.supabase_url).or(existing.supabase_url),
        supabase_anon_key: normalize_text_option(updates.supabase_anon_key)
            .or(existing.supabase_anon_key),
        realtime_url: normalize_text_option(updates.realtime_url).or(existing.realtime_url),
        farm_id: normalize_text_option(updates.farm_id).or(existing.farm_id),
    }
}
