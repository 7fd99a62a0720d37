use keepsake_core::Profile;

use crate::cli::ProfileCommands;
use crate::commands::common::{normalize_content, CliPaths, Device};
use crate::error::CliError;

pub async fn run_profile(
    command: Option<ProfileCommands>,
    paths: &CliPaths,
) -> Result<(), CliError> {
    let device = Device::connect(paths).await?;
    let profile = device.engine.profile_cache().read(true).await?;

    let profile = match command.unwrap_or(ProfileCommands::Show) {
        ProfileCommands::Show => profile,
        ProfileCommands::Rename { name } => {
            let name = normalize_content(&name.join(" ")).ok_or(CliError::EmptyProfileName)?;
            save_profile(&device, Profile { name, ..profile }).await?
        }
        ProfileCommands::CompleteOnboarding => {
            save_profile(
                &device,
                Profile {
                    has_completed_onboarding: true,
                    ..profile
                },
            )
            .await?
        }
    };
    device.finish().await?;

    for line in format_profile_lines(&profile) {
        println!("{line}");
    }
    Ok(())
}

async fn save_profile(device: &Device, profile: Profile) -> Result<Profile, CliError> {
    device.engine.mark_needs_sync(profile).await?;
    Ok(device.engine.profile_cache().read(false).await?)
}

pub fn format_profile_lines(profile: &Profile) -> Vec<String> {
    let onboarding = if profile.has_completed_onboarding {
        "completed"
    } else {
        "pending"
    };
    let sync = if profile.needs_sync {
        "pending upload"
    } else {
        "synced"
    };

    vec![
        format!("name:        {}", profile.name),
        format!("onboarding:  {onboarding}"),
        format!("state:       {sync}"),
    ]
}
