use std::io::Write;

use voltronic_bridge::prelude::*;

#[tokio::main]
async fn main() {
    let options = Options::new();

    // the logger level comes from the config, so nothing can be logged yet
    let config = match Config::find(options.config_file.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Failed to load config: {}", err);
            std::process::exit(255);
        }
    };

    let level = if options.debug { "debug" } else { config.loglevel() };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .init();

    config.log_settings();

    if let Err(err) = voltronic_bridge::app(options, config).await {
        error!("{:#}", err);
        std::process::exit(1);
    }
}
