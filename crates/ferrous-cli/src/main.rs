use clap::{Parser, Subcommand, ValueEnum};
use ferrous_kernel::{selftest, KernelConfig, PRI_DEFAULT};
use log::info;
use std::error::Error;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run built-in synchronization self tests
    SelfTest {
        /// Which suite to run
        #[arg(value_enum, default_value_t = Suite::All)]
        suite: Suite,

        /// Priority of the main kernel thread
        #[arg(long, default_value_t = PRI_DEFAULT, value_parser = clap::value_parser!(u8).range(0..=63))]
        priority: u8,

        /// Name of the main kernel thread
        #[arg(long, default_value = "main")]
        name: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Suite {
    Sema,
    Donation,
    Condvar,
    All,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::SelfTest {
            suite,
            priority,
            name,
        } => {
            let config = KernelConfig {
                main_name: name,
                main_priority: priority,
            };
            info!("main thread priority {}", priority);

            match suite {
                Suite::Sema => selftest::sema(config)?,
                Suite::Donation => selftest::donation(config)?,
                Suite::Condvar => selftest::condvar(config)?,
                Suite::All => selftest::all(config)?,
            }

            println!("Self tests passed.");
        }
    }

    Ok(())
}
