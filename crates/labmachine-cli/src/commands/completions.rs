use super::EXIT_SUCCESS;
use clap::CommandFactory;
use clap_complete::{generate, Shell};

#[allow(clippy::unnecessary_wraps)]
pub fn run<C: CommandFactory>(shell: Shell) -> Result<u8, String> {
    generate(shell, &mut C::command(), "labctl", &mut std::io::stdout());
    Ok(EXIT_SUCCESS)
}
