use crate::prelude::*;
use clap::ArgMatches;
use nu_ansi_term::Color;
use rayon::prelude::*;

fn retype_and_lower(body: &mut Body) -> DwResult<LoweredCode> {
    analysis::retype(body)?;
    Ok(codegen::lower(body)?)
}

pub fn run(args: &ArgMatches) -> DwResult<()> {
    init_logger(args);

    let mut bodies = read_bodies(args)?;
    let results: Vec<DwResult<LoweredCode>> =
        bodies.par_iter_mut().map(retype_and_lower).collect();

    let mut lowered = Vec::with_capacity(results.len());
    let mut last_res = Ok(());
    for (body, res) in bodies.iter().zip(results) {
        match res {
            Ok(code) => {
                log::info!(
                    "{} {} ({} code units)",
                    Color::Green.paint("lowered"),
                    body.method(),
                    code.insns_size
                );
                lowered.push(code);
            }
            Err(err) => {
                log::error!("{} {}: {err}", Color::Red.paint("failed"), body.method());
                last_res = Err(err);
            }
        }
    }

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&lowered)?);
    } else {
        for code in &lowered {
            print!("{code}");
        }
    }

    log::info!("");
    log::info!("lowered methods: {} / {}", lowered.len(), bodies.len());

    last_res
}
