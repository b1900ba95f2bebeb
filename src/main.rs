use em390::{Configuration, Emulator};
use std::env;
use std::process;

fn usage() -> ! {
    eprintln!("usage: em390 [--debug] [--cpus N] [--mainsize MiB] [--xpnd BLOCKS] [--load HEXADDR] IMAGE");
    eprintln!("IMAGE is a raw core image; absolute zero must hold the IPL PSW.");
    process::exit(2);
}

fn main() {
    env_logger::init();

    let mut config = Configuration::default();
    let mut debug = false;
    let mut image = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--debug" => debug = true,
            "--cpus" => {
                config.numcpu = args
                    .next()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(|| usage());
            }
            "--mainsize" => {
                let mib: usize = args
                    .next()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(|| usage());
                config.mainsize = mib << 20;
            }
            "--xpnd" => {
                config.xpndsize = args
                    .next()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_else(|| usage());
            }
            "--load" => {
                config.load_address = args
                    .next()
                    .and_then(|v| u32::from_str_radix(v.trim_start_matches("0x"), 16).ok())
                    .unwrap_or_else(|| usage());
            }
            _ if image.is_none() && !arg.starts_with('-') => image = Some(arg),
            _ => usage(),
        }
    }
    let image = image.unwrap_or_else(|| usage());

    let mut emulator = Emulator::new(config);
    if let Err(err) = emulator.run(&image, debug) {
        eprintln!("em390: {}", err);
        process::exit(1);
    }
}
