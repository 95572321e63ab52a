use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::context::LauncherContext;
use crate::error::{LauncherError, Result};
use crate::events::{Runner, Status};
use crate::process::{run, ProcessOutput, RunOptions};
use crate::settings::{expand_user_path, GameSettings};
use crate::steam::{get_steam_runtime, RuntimeKind};
use crate::wine::{wine_command, ProtonVerb, WineCatalog, WinePrompt, WineValidator};

/// Splits a user supplied argument string, honoring quotes and backslash escapes.
pub fn split_args_quoted(src: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut quote_char: char = '\0';
    let mut escape = false;
    for ch in src.chars() {
        if escape {
            cur.push(ch);
            escape = false;
            continue;
        }
        match ch {
            '\\' => { escape = true; }
            '"' | '\'' => {
                if in_quotes {
                    if ch == quote_char { in_quotes = false; } else { cur.push(ch); }
                } else {
                    in_quotes = true; quote_char = ch;
                }
            }
            c if c.is_whitespace() && !in_quotes => {
                if !cur.is_empty() { out.push(std::mem::take(&mut cur)); }
            }
            _ => cur.push(ch),
        }
    }
    if !cur.is_empty() { out.push(cur); }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub app_name: String,
    pub runner: Runner,
    pub executable: PathBuf,
    /// runs directly instead of through Wine/Proton
    pub is_native: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

fn ensure_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path)?.permissions();
        if perms.mode() & 0o111 == 0 {
            perms.set_mode(perms.mode() | 0o755);
            std::fs::set_permissions(path, perms)?;
        }
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

fn target_executable(req: &LaunchRequest, game: &GameSettings) -> PathBuf {
    match game.target_exe.as_deref().filter(|s| !s.is_empty()) {
        Some(exe) => expand_user_path(exe),
        None => req.executable.clone(),
    }
}

/// Command for a game that runs on the host directly.
pub fn native_command(req: &LaunchRequest, game: &GameSettings) -> Result<LaunchCommand> {
    let exe = target_executable(req, game);
    if !exe.is_file() {
        return Err(LauncherError::NotFound(format!("executable {}", exe.display())));
    }
    ensure_executable(&exe)?;
    Ok(LaunchCommand {
        args: split_args_quoted(game.launcher_args.as_deref().unwrap_or("")),
        env: game.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        cwd: exe.parent().map(Path::to_path_buf),
        program: exe,
    })
}

/// Command for a Windows game, run through the game's Wine or Proton.
pub fn compat_command(req: &LaunchRequest, game: &GameSettings) -> Result<LaunchCommand> {
    let exe = target_executable(req, game);
    let mut parts = vec![exe.to_string_lossy().into_owned()];
    parts.extend(split_args_quoted(game.launcher_args.as_deref().unwrap_or("")));
    let cmd = wine_command(game, &parts, ProtonVerb::WaitForExitAndRun)?;
    Ok(LaunchCommand { program: cmd.program, args: cmd.args, env: cmd.env, cwd: exe.parent().map(Path::to_path_buf) })
}

fn wrap_in_runtime(cmd: LaunchCommand, kind: RuntimeKind) -> LaunchCommand {
    let Some(rt) = get_steam_runtime(kind) else {
        error!("Steam runtime requested but none is installed, launching without it");
        return cmd;
    };
    info!("Using Steam runtime {}", rt.path.display());
    let mut args = rt.args;
    args.push(cmd.program.to_string_lossy().into_owned());
    args.extend(cmd.args);
    LaunchCommand { program: rt.path, args, ..cmd }
}

/// Launches a game and waits for it to exit.
///
/// Non-native games get a usable compatibility layer first; declining every offered
/// substitute ends with `Cancelled`. The run can be aborted with the game's app name.
pub async fn launch_game<V, P, C>(ctx: &LauncherContext, req: &LaunchRequest, validator: &V, prompt: &P, catalog: &C) -> Result<ProcessOutput>
where
    V: WineValidator,
    P: WinePrompt,
    C: WineCatalog,
{
    let app = req.app_name.as_str();
    let job = ctx.jobs.begin(app, req.runner, Status::Launching)?;
    ctx.game_log(app, &format!("Launching {} ({})", app, req.runner));
    let mut game = ctx.settings.load_game(app)?;

    let cmd = if req.is_native {
        native_command(req, &game)?
    } else {
        let resolution = ctx.check_wine(app, &mut game, validator, prompt, catalog).await?;
        if !resolution.can_launch() {
            job.finish(Status::Done);
            return Err(LauncherError::Cancelled(format!("no usable Wine for {app}")));
        }
        let cmd = compat_command(req, &game)?;
        if game.use_steam_runtime && game.wine_version.is_proton() {
            wrap_in_runtime(cmd, RuntimeKind::Sniper)
        } else {
            cmd
        }
    };

    job.update(Status::Playing)?;
    info!("Launching {}: {} {:?}", app, cmd.program.display(), cmd.args);
    let mut opts = RunOptions { env: cmd.env, cwd: cmd.cwd, ..Default::default() }.with_abort(ctx.aborts.create(app));
    opts.log_limit = 200;
    let mut log = ctx.open_game_log(app);
    let res = run(&cmd.program, &cmd.args[..], &opts, |line| log.line(line)).await;
    ctx.aborts.remove(app);

    match res {
        Ok(out) => {
            info!("{} exited with {:?}", app, out.code);
            log.line(&format!("Game exited with code {:?}", out.code));
            job.finish(Status::Done);
            Ok(out)
        }
        Err(e) => {
            log.line(&format!("Launch failed: {e}"));
            job.finish(if matches!(e, LauncherError::Cancelled(_)) { Status::Done } else { Status::Error });
            Err(e)
        }
    }
}
