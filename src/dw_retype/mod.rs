use crate::prelude::*;
use clap::ArgMatches;
use nu_ansi_term::Color;
use rayon::prelude::*;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

pub fn run(args: &ArgMatches) -> DwResult<()> {
    init_logger(args);

    let mut bodies = read_bodies(args)?;
    let results: Vec<DwResult<()>> = bodies
        .par_iter_mut()
        .map(|body| analysis::retype(body).map_err(DwError::from))
        .collect();

    let output = args.get_one::<String>("output").map(Path::new);
    if let Some(dir) = output {
        fs::create_dir_all(dir)?;
    }

    let mut nb_success = 0;
    let mut nb_fails = 0;
    let mut last_res = Ok(());
    for (i, (body, res)) in bodies.iter().zip(results).enumerate() {
        match res {
            Ok(()) => {
                log::info!("{} {}", Color::Green.paint("typed"), body.method());
                print!("{body}");
                if let Some(dir) = output {
                    let cfg = Cfg::build(body)?;
                    let dot_filename = dir.join(format!("{i:04}_{}.dot", body.method().name));
                    let mut file = File::create(&dot_filename)?;
                    file.write_all(cfg.to_dot(body).as_bytes())?;
                    log::debug!("dot output written in {:?}", dot_filename);
                }
                nb_success += 1;
            }
            Err(err) => {
                log::error!("{} {}: {err}", Color::Red.paint("untypable"), body.method());
                nb_fails += 1;
                last_res = Err(err);
            }
        }
    }

    log::info!("");
    log::info!(
        "typed methods: {} / {}",
        nb_success,
        nb_success + nb_fails
    );

    last_res
}
