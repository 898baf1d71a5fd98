use std::process::ExitCode;

use clap::Parser;

use colorimeter::{
    Args, RunOptions, SystemTerminalClient, fake_backend, real_backend, run_with_clients,
};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let mut stdout = std::io::stdout();

    let run_result = async {
        let options = RunOptions::from_args(&args);
        let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
        let backend = match maybe_fake_args {
            Some(fake_args) => fake_backend(fake_args),
            None => real_backend(),
        };

        run_with_clients(command, &mut stdout, &SystemTerminalClient, backend, options).await
    }
    .await;

    match run_result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(1)
        }
    }
}
