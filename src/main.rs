use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use archive_gateway::models::ArchiveQuery;
use archive_gateway::{
    match_territory, ApiError, ArchiveClient, ArchiveMetadata, ClientConfig, DirectoryTarget,
    ProgressCallback, UploadFile,
};

#[tokio::main]
async fn main() {
    // Use RUST_LOG env var if set, otherwise default to info level
    let log_filter = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    let args: Vec<String> = env::args().collect();
    let program = program_name(&args);
    if args.len() < 2 {
        print_usage(program);
        std::process::exit(1);
    }

    let config = ClientConfig::load();
    let client = match ArchiveClient::from_config(&config) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to initialize client: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&client, &config, &args).await {
        error!("{}", e);
        if e.is_auth() {
            error!("Log in again with: {} login <email> <password>", program);
        }
        std::process::exit(1);
    }
}

async fn run(client: &ArchiveClient, config: &ClientConfig, args: &[String]) -> Result<(), ApiError> {
    let program = program_name(args);
    let Some(command) = args.get(1) else {
        usage_error(program, "missing command");
    };
    match command.as_str() {
        "login" => {
            let (Some(email), Some(password)) = (args.get(2), args.get(3)) else {
                usage_error(program, "login requires <email> <password>");
            };
            client.login(email, password).await?;
            let user = client.current_user().await?;
            println!("Logged in as {} ({})", user.full_name, user.role);
        }
        "logout" => {
            client.logout()?;
            println!("Logged out");
        }
        "me" => {
            let user = client.current_user().await?;
            println!("{} <{}>", user.full_name, user.email);
            println!("  role: {}", user.role);
            if let Some(org) = &user.organization {
                println!("  organization: {}", org);
            }
        }
        "territories" => {
            for entry in client.territories_with_stats().await? {
                println!(
                    "{}  {} ({}), {} archives",
                    entry.territory.id, entry.territory.name, entry.territory.country, entry.archive_count
                );
            }
        }
        "match" => {
            if args.len() < 3 {
                usage_error(program, "match requires <location text>");
            }
            let location = args[2..].join(" ");
            let territories = client.list_territories().await?;
            let result = match_territory(&location, &territories, None);
            match result.territory {
                Some(territory) => println!("{}  {}", territory.id, result.hint),
                None => println!("No territory matches \"{}\"", location),
            }
        }
        "upload" => {
            let Some(path) = args.get(2).map(PathBuf::from) else {
                usage_error(program, "upload requires <file>");
            };
            let file = UploadFile::from_path(&path).await?;
            let mut metadata = ArchiveMetadata::for_file(&file.file_name, file.mime_type.as_deref());
            if let Some(title) = args.get(3) {
                metadata.title = title.clone();
            }

            let on_progress: ProgressCallback = Arc::new(|percent| {
                if percent % 10 == 0 {
                    info!("Upload {}%", percent);
                }
            });
            let archive = client.create_archive(&metadata, file, Some(on_progress)).await?;
            println!("Created archive {} \"{}\"", archive.id, archive.title);
        }
        "export" => {
            let dir = args
                .get(2)
                .map(PathBuf::from)
                .unwrap_or_else(|| config.download_dir.clone());
            let saved = client
                .export_csv(&ArchiveQuery::default(), &DirectoryTarget::new(dir))
                .await?;
            println!("Saved {}", saved.display());
        }
        other => usage_error(program, &format!("Unknown command: {}", other)),
    }

    Ok(())
}

/// argv[0], or the binary name when the OS passed no arguments at all
fn program_name(args: &[String]) -> &str {
    args.first().map(String::as_str).unwrap_or("archive-gateway")
}

fn usage_error(program: &str, message: &str) -> ! {
    error!("{}", message);
    print_usage(program);
    std::process::exit(1);
}

fn print_usage(program: &str) {
    eprintln!("Usage:");
    eprintln!("  {} login <email> <password>", program);
    eprintln!("  {} logout", program);
    eprintln!("  {} me", program);
    eprintln!("  {} territories", program);
    eprintln!("  {} match <location text>", program);
    eprintln!("  {} upload <file> [title]", program);
    eprintln!("  {} export [dir]", program);
    eprintln!();
    eprintln!("Environment: ARCHIVE_API_URL, ARCHIVE_API_PREFIX, ARCHIVE_UPLOAD_TIMEOUT_SECS,");
    eprintln!("             ARCHIVE_CONNECT_TIMEOUT_SECS, ARCHIVE_KEYRING_SERVICE, ARCHIVE_DOWNLOAD_DIR");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_name_without_argv() {
        assert_eq!(program_name(&[]), "archive-gateway");
        assert_eq!(program_name(&["/usr/bin/ag".to_string()]), "/usr/bin/ag");
    }
}
