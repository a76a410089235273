use clap::Subcommand;
use comfy_table::{presets::UTF8_FULL, Table};
use tokio::sync::watch;
use tombola_draw::LotteryService;

#[derive(Subcommand)]
pub enum SchedulerCommands {
    /// Run the draw scheduler until interrupted
    Run,
    /// Process everything that is due once and exit
    Tick,
    /// Show scheduled work
    Pending,
}

pub async fn handle_scheduler_command(
    cmd: SchedulerCommands,
    service: &LotteryService,
) -> anyhow::Result<()> {
    match cmd {
        SchedulerCommands::Run => {
            let restored = service.restore().await?;
            println!(
                "Scheduler running for {} active lotteries, press Ctrl+C to stop",
                restored
            );

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let handle = tokio::spawn(service.scheduler().run(shutdown_rx));

            tokio::signal::ctrl_c().await?;
            tracing::info!("Shutdown requested");
            shutdown_tx.send(true)?;
            handle.await?;
        }

        SchedulerCommands::Tick => {
            service.reschedule().await?;
            let report = service.tick().await;
            println!(
                "Completed: {}, cancelled: {}, skipped: {}, failed: {}, notifications: {}, cleaned up: {}",
                report.completed,
                report.cancelled,
                report.skipped,
                report.failed,
                report.notifications,
                report.cleaned_up
            );
        }

        SchedulerCommands::Pending => {
            service.reschedule().await?;
            let pending = service.scheduler().pending();
            if pending.is_empty() {
                println!("Nothing scheduled.");
                return Ok(());
            }

            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec!["Fires At", "Lottery", "Task"]);
            for task in pending {
                table.add_row(vec![
                    task.fire_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    task.lottery_id.to_string(),
                    format!("{:?}", task.kind),
                ]);
            }
            println!("{}", table);
        }
    }

    Ok(())
}
