use std::sync::Arc;
use std::time::Duration;

use shadow_session_runtime::cli::{Console, ConsoleRenderer};
use shadow_session_runtime::llm::ScriptedProvider;
use shadow_session_runtime::logging::{self, LoggingConfig};
use shadow_session_runtime::session::FileStore;
use shadow_session_runtime::{
    RoleAuthority, RuntimeConfig, RuntimeResult, SessionId, SessionRegistry, SessionRole,
};

fn label(id: SessionId) -> String {
    id.to_string()[..8].to_string()
}

/// Attach a renderer to `id`, replaying what it buffered while detached
fn attach(registry: &SessionRegistry, id: SessionId) -> RuntimeResult<()> {
    let renderer = ConsoleRenderer::new(label(id));
    let replay = registry.attach_with_replay(id, Arc::new(renderer.clone()))?;
    renderer.replay(&replay);
    Ok(())
}

/// Handle one `/command`; returns the session to continue with
async fn run_command(
    registry: &SessionRegistry,
    console: &Console,
    current: SessionId,
    command: &str,
    args: &[&str],
) -> RuntimeResult<SessionId> {
    match command {
        "/list" => {
            console.print_sessions(&registry.list(), Some(current));
        }
        "/new" => {
            registry.detach(current)?;
            let id = registry.create(args.first().map(|s| s.to_string()));
            attach(registry, id)?;
            console.print_system(&format!("Created session {}", label(id)));
            return Ok(id);
        }
        "/watch" => {
            let Some(name) = args.first() else {
                console.print_error("usage: /watch <role> [peer|supervisor]");
                return Ok(current);
            };
            let authority = match args.get(1).copied() {
                Some("supervisor") => RoleAuthority::Supervisor,
                _ => RoleAuthority::Peer,
            };
            let role = SessionRole::new(*name, authority).with_auto_inject(true);
            let watcher = registry.create_watcher(current, None, role)?;
            console.print_system(&format!(
                "Session {} now watches {} as {} ({})",
                label(watcher),
                label(current),
                name,
                authority
            ));
        }
        "/switch" => {
            let sessions = registry.list();
            let target = args
                .first()
                .and_then(|n| n.parse::<usize>().ok())
                .and_then(|n| sessions.get(n));
            let Some(target) = target else {
                console.print_error("usage: /switch <n>, with n from /list");
                return Ok(current);
            };
            registry.detach(current)?;
            attach(registry, target.id)?;
            return Ok(target.id);
        }
        "/detach" => {
            registry.detach(current)?;
            console.print_system("Detached; output keeps buffering in the background");
        }
        "/attach" => {
            attach(registry, current)?;
        }
        "/compact" => {
            let result = registry.compact(current).await?;
            if result.is_noop() {
                console.print_system("Nothing to compact");
            } else {
                console.print_system(&format!(
                    "Compacted {} -> {} tokens ({} turns summarized, {} kept)",
                    result.original_tokens,
                    result.compacted_tokens,
                    result.turns_summarized,
                    result.turns_kept
                ));
            }
        }
        "/interrupt" => {
            registry.interrupt(current)?;
        }
        "/destroy" => {
            registry.destroy(current)?;
            console.print_system(&format!("Destroyed session {}", label(current)));
            let next = match registry.list().first() {
                Some(info) => info.id,
                None => registry.create(None),
            };
            attach(registry, next)?;
            return Ok(next);
        }
        other => {
            console.print_error(&format!("Unknown command: {}", other));
        }
    }
    Ok(current)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RuntimeConfig::from_env()?;

    // Logs go to a file so they do not interleave with session output
    let _guard = logging::init_logging(
        LoggingConfig::default()
            .with_stderr(false)
            .with_file(config.sessions_dir.join("runtime.jsonl")),
    )?;

    tracing::info!("=== Shadow Sessions Starting ===");

    let console = Console::new();
    let provider = Arc::new(ScriptedProvider::new().with_chunk_delay(Duration::from_millis(20)));
    let store = Arc::new(FileStore::with_dir(&config.sessions_dir));
    let registry = SessionRegistry::new(provider, store, config)?;

    console.print_banner();

    let mut current = registry.create(None);
    attach(&registry, current)?;

    loop {
        let reader = console.clone();
        let prompt = label(current);
        let line = tokio::task::spawn_blocking(move || reader.read_input(&prompt)).await??;
        if line.is_empty() {
            continue;
        }

        if !line.starts_with('/') {
            if let Err(e) = registry.send_input(current, line, None) {
                console.print_error(&e.to_string());
            }
            continue;
        }

        let mut parts = line.split_whitespace();
        let command = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();
        if matches!(command, "/quit" | "/exit") {
            break;
        }
        match run_command(&registry, &console, current, command, &args).await {
            Ok(next) => current = next,
            Err(e) => console.print_error(&e.to_string()),
        }
    }

    registry.shutdown_all();
    tracing::info!("=== Shadow Sessions Shutting Down ===");

    Ok(())
}
