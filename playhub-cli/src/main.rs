mod cli;
mod terminal;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use cli::{Args, Cmd, WineCmd};
use playhub_core::{
    bytes_to_size, dir_size, download_file, extract_files, init_logging, launch_game, list_alternative_wines, move_install, status_label,
    AbortToken, AppDirs, ExtractBackend, ExtractOptions, GithubWineCatalog, InstalledGame, LaunchRequest, LauncherContext, LauncherError,
    MoveResult, ProbeValidator, ProgressSnapshot, Status, WineResolution,
};
use terminal::{percent_bar, show, TerminalPrompt};

fn catalog(ctx: &LauncherContext, id: &str) -> GithubWineCatalog {
    let pb = percent_bar("wine");
    GithubWineCatalog::new(ctx.dirs.clone(), ctx.aborts.create(id)).with_progress(Arc::new(move |version: &str, phase: Status, p: &ProgressSnapshot| {
        pb.set_prefix(version.to_string());
        match phase {
            Status::Extracting => pb.set_message(format!("extracting {}", p.file)),
            Status::Done => pb.finish_with_message(format!("installed, {}", bytes_to_size(p.bytes))),
            _ => show(&pb, p),
        }
    }))
}

async fn run(ctx: &LauncherContext, cmd: Cmd) -> Result<()> {
    let validator = ProbeValidator { probe_version: true };
    match cmd {
        Cmd::Launch { app_name, runner, exe, native } => {
            let req = LaunchRequest { app_name: app_name.clone(), runner, executable: exe, is_native: native };
            let wines = catalog(ctx, "wine-download");
            let out = launch_game(ctx, &req, &validator, &TerminalPrompt, &wines).await;
            ctx.aborts.remove("wine-download");
            match out {
                Ok(out) => info!("{} exited with {:?}", app_name, out.code),
                Err(e) => {
                    let d = e.dialog();
                    bail!("{}: {}", d.title, d.message);
                }
            }
        }
        Cmd::Move { app_name, runner, from, to } => {
            let title = from.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| app_name.clone());
            let game = InstalledGame { app_name: app_name.clone(), runner, title, install_path: Some(from) };
            let pb = percent_bar("moving");
            let _sub = ctx.events.subscribe_progress(&app_name, {
                let pb = pb.clone();
                move |s| {
                    if let Some(p) = &s.progress {
                        show(&pb, p);
                    }
                }
            });
            match move_install(ctx, &game, &to).await {
                MoveResult::Done { install_path } => {
                    let size = bytes_to_size(dir_size(&install_path));
                    let label = status_label(Status::Installed, game.runner, None, Some(&size));
                    pb.finish_with_message(format!("moved to {} ({label})", install_path.display()));
                }
                MoveResult::Error { error } => {
                    pb.abandon();
                    bail!("move failed: {error}");
                }
            }
        }
        Cmd::Download { url, dest } => {
            let token = ctx.aborts.create("download");
            let pb = percent_bar("download");
            let res = download_file(&reqwest::Client::new(), &url, &dest, &token, |p| show(&pb, p)).await;
            ctx.aborts.remove("download");
            if let Err(e) = res {
                pb.abandon();
                let d = e.dialog();
                bail!("{}: {}", d.title, d.message);
            }
            pb.finish_with_message(format!("saved to {}", dest.display()));
        }
        Cmd::Extract { archive, dest, strip, library } => {
            let backend = if library { ExtractBackend::Library } else { ExtractBackend::for_archive(&archive) };
            extract_files(&ExtractOptions { path: archive, destination: dest, strip }, backend).await?;
        }
        Cmd::Wine { cmd } => run_wine(ctx, cmd, &validator).await?,
    }
    Ok(())
}

async fn run_wine(ctx: &LauncherContext, cmd: WineCmd, validator: &ProbeValidator) -> Result<()> {
    match cmd {
        WineCmd::List => {
            for w in list_alternative_wines(&ctx.dirs) {
                println!("{:<32} {:<10} {}", w.name, format!("{:?}", w.kind), w.bin);
            }
        }
        WineCmd::Releases => {
            let wines = GithubWineCatalog::new(ctx.dirs.clone(), AbortToken::new());
            for r in wines.available_releases().await? {
                let size = humansize::format_size(r.size, humansize::BINARY);
                println!("{:<32} {:>10}  {}", r.version, size, r.date);
            }
        }
        WineCmd::Install { version } => {
            let wines = catalog(ctx, "wine-install");
            let releases = wines.available_releases().await?;
            let release = releases.iter().find(|r| r.version == version).with_context(|| format!("no release named {version}"))?;
            let dir = wines.install_release(release).await;
            ctx.aborts.remove("wine-install");
            println!("installed to {}", dir?.display());
        }
        WineCmd::Check { app_name } => {
            let wines = catalog(ctx, "wine-download");
            let mut game = ctx.settings.load_game(&app_name)?;
            let res = ctx.check_wine(&app_name, &mut game, validator, &TerminalPrompt, &wines).await;
            ctx.aborts.remove("wine-download");
            match res? {
                WineResolution::AlreadyValid => println!("{} is ready", game.wine_version.name),
                WineResolution::Adopted(w) | WineResolution::DownloadedFallback(w) => println!("now using {}", w.name),
                WineResolution::Aborted => bail!("no usable Wine for {app_name}"),
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let dirs = match &args.root {
        Some(root) => AppDirs::under(root),
        None => AppDirs::new()?,
    };
    init_logging(&dirs.logs);
    let ctx = Arc::new(LauncherContext::new(dirs)?);

    tokio::spawn({
        let ctx = ctx.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                ctx.handle_exit().await;
            }
        }
    });

    let res = run(&ctx, args.cmd).await;
    if let Err(e) = &res {
        if let Some(LauncherError::Cancelled(_)) = e.downcast_ref::<LauncherError>() {
            info!("cancelled");
        } else {
            error!("{:#}", e);
        }
    }
    res
}
