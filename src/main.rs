use dns_warm::logging::init_logging;
use dns_warm::{Error, Report, WarmConf, Warmer};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::{env, process};

fn main() {
    init_logging();

    let conf = WarmConf::default();
    let server = conf.udp.server();
    match run(conf) {
        Ok(report) => {
            println!(
                "dns-warm: resolver={} domains={} duration={:.1}s",
                server.ip(),
                report.domains,
                report.duration.as_secs_f64()
            );
        }
        Err(err) if err.is_startup() => {
            eprintln!("dns-warm: {}", err);
            process::exit(1);
        }
        Err(err) => {
            eprintln!("dns-warm: aborted: {}", err);
            process::exit(1);
        }
    }
}

fn run(conf: WarmConf) -> Result<Report, Error> {
    let mut args = env::args_os();
    let name = args
        .next()
        .map(|arg| arg.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dns-warm".into());
    let path = match (args.next(), args.next()) {
        (Some(path), None) => PathBuf::from(path),
        _ => return Err(Error::Usage(format!("{} <domain-file>", name))),
    };

    let file = File::open(&path).map_err(|source| Error::Open {
        path: path.clone(),
        source,
    })?;
    let mut warmer = Warmer::from_conf(conf)?;
    warmer.run(BufReader::new(file))
}
