use chrono::{DateTime, Duration, Local};

use crate::api::Registration;
use crate::installer::catalog::Repository;
use crate::manager::settings::{SettingsStore, StoredSettings};
use crate::schedule::time_of_day::UpdateTime;
use crate::schedule::timer::next_update_after;

pub fn run_diagnostics(
    registration: &Registration,
    store: &SettingsStore,
    settings: &StoredSettings,
    repository: &Repository,
    now: DateTime<Local>,
) {
    println!("Extension Manager diagnostics");
    println!(
        "Registered as: {} ({})",
        registration.display_name, registration.extension_id
    );
    println!("Config file: {}", store.path().display());
    println!("Update time: {}", settings.update_time);
    println!("{}", describe_next_update(&settings.update_time, now));
    println!(
        "Logging: {}",
        if settings.logging { "enabled" } else { "disabled" }
    );
    println!(
        "Features: auto_update={} log_mode={}",
        repository.features.auto_update, repository.features.log_mode
    );
    println!(
        "Repository: {} categories, {} extensions",
        repository.categories.len(),
        repository.extension_count()
    );
    for category in &repository.categories {
        println!(
            "  [{}] {} extension(s)",
            category.title,
            category.extensions.len()
        );
    }
}

pub fn describe_next_update(raw: &str, now: DateTime<Local>) -> String {
    match raw.parse::<UpdateTime>() {
        Ok(time) => {
            let next = next_update_after(&time, &now, &Local);
            format!(
                "Next update check: {} (in {})",
                next.format("%Y-%m-%d %H:%M %Z"),
                format_countdown(next - now)
            )
        }
        Err(err) => format!("Next update check: not scheduled ({err})"),
    }
}

fn format_countdown(remaining: Duration) -> String {
    let minutes = remaining.num_minutes().max(0);
    format!("{}h {:02}m", minutes / 60, minutes % 60)
}
