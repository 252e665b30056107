use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use daisy_control_lib::command::registry::{
    DEVICE_TYPE_RGB_LIGHT, DEVICE_TYPE_WHITE_LIGHT, DEVICE_TYPE_WHITE_LIGHT_ALT,
};
use daisy_control_lib::control_interface::{ControlInterface, CoverState, LightState};
use daisy_control_lib::util::discovery::{DeviceRecord, Discovery, InstallationReport};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    handle_cli(cli).await
}

/// This struct defines the command line interface of the application
#[derive(Parser)]
#[clap(
    name = "daisy-control",
    about = "Discovers Teleco Automation Daisy pergola accessories",
    version
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

/// Supported output formats for the `discover` command.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum OutputFormat {
    /// Plain text format.
    Plaintext,
    /// JSON format.
    Json,
    /// YAML format.
    Yaml,
}

/// Subcommands available for the CLI
#[derive(Subcommand)]
pub enum Commands {
    /// Lists every installation, room and device on the account, with the
    /// `idDevicetype` values needed to map unsupported accessories
    #[clap(name = "discover")]
    Discover {
        /// Email of the account registered in the vendor app
        email: String,

        /// Password of the account
        password: String,

        /// Output format (plaintext, json, yaml)
        #[clap(short, long, value_enum, default_value_t = OutputFormat::Plaintext)]
        output: OutputFormat,
    },
}

async fn handle_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Discover {
            email,
            password,
            output,
        } => {
            let client = ControlInterface::new(&email, &password);
            client
                .login()
                .await
                .context("could not sign in to the Daisy cloud")?;

            let reports = Discovery::account_report(&client).await?;
            let records = Discovery::list_devices(&client).await?;

            match output {
                OutputFormat::Plaintext => print_plaintext(&client, &reports, &records).await?,
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&reports)?);
                }
                OutputFormat::Yaml => {
                    println!("{}", serde_yaml::to_string(&reports)?);
                }
            }
        }
    }
    Ok(())
}

async fn print_plaintext(
    client: &ControlInterface,
    reports: &[InstallationReport],
    records: &[DeviceRecord],
) -> Result<()> {
    for report in reports {
        println!("# INSTALLATION");
        println!(
            "{} \"{}\" (idInstallation: {})",
            report.installation, report.installation.inst_description, report.installation.id_installation
        );
        match report.node_active {
            Some(true) => println!("node is active"),
            Some(false) => println!("node is NOT active"),
            None => println!("node status unavailable"),
        }

        println!("\n## ROOM CONFIGURATIONS");
        for room in &report.rooms {
            println!("DaisyRoom \"{}\"", room.room_description);
            println!("\n### DEVICE COMMANDS");
            for device in &room.device_list {
                println!("{}", device.device);
                for command in &device.device_command_list {
                    println!(
                        "  {} id:{} param:{} lowlevel:{}",
                        command.command_action,
                        command.id_installation_device_command,
                        command.command_param,
                        command.lowlevel_command.as_deref().unwrap_or("-")
                    );
                }
            }
        }

        println!("\n## DEVICE STATI");
        for room in client.rooms(&report.installation).await? {
            println!("{room}");
            for device in &room.device_list {
                println!("{device}");
                let statuses = client.device_status(&report.installation, device).await?;
                for status in &statuses {
                    println!(
                        "  {} = {} ({})",
                        status.statusitem_code, status.status_value, status.status_item
                    );
                }
                if is_light(device.id_devicetype) {
                    println!("  decoded: {:?}", LightState::from_statuses(&statuses));
                } else {
                    println!("  decoded: {:?}", CoverState::from_statuses(&statuses));
                }
            }
        }

        if report.skipped_devices > 0 {
            println!(
                "\n{} device record(s) could not be parsed and were skipped.",
                report.skipped_devices
            );
        }
        println!();
    }

    let unmapped: Vec<&DeviceRecord> = records.iter().filter(|record| !record.supported).collect();
    if !unmapped.is_empty() {
        println!("# UNSUPPORTED DEVICE TYPES");
        for record in &unmapped {
            println!(
                "{} in room \"{}\" has device type {} with no capability descriptor",
                record.device, record.room, record.device.id_devicetype
            );
        }
        println!("Please open an issue and include all of the output above.");
    }

    Ok(())
}

fn is_light(id_devicetype: u32) -> bool {
    matches!(
        id_devicetype,
        DEVICE_TYPE_RGB_LIGHT | DEVICE_TYPE_WHITE_LIGHT | DEVICE_TYPE_WHITE_LIGHT_ALT
    )
}
