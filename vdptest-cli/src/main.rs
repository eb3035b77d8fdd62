/*
    vdptest: Command-line MSX VDP I/O timing benchmark on an emulated MSX2.
    Copyright (C) 2023  The VDPTEST Authors

    vdptest is free software: you can redistribute it and/or modify
    it under the terms of the GNU General Public License as published by
    the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    vdptest is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU General Public License for more details.

    You should have received a copy of the GNU General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.

    Author contact information: see Cargo.toml file, section [package.authors].
*/
use std::fs::File;
use std::io::BufReader;

use clap::{clap_app, ArgMatches};
#[allow(unused_imports)]
use log::{error, warn, info, debug, trace, Level};

use vdptest::bench;
use vdptest::catalog::TESTS;
use vdptest::chip::MsxGeneration;
use vdptest::config::{BenchConfig, BuildVariant, Calibration};
use vdptest::materialize::build_rom_image;
use vdptest::msx::{MachineConfig, MsxMachine};

type Result<T> = core::result::Result<T, Box<dyn std::error::Error>>;

fn parse_arg<T>(matches: &ArgMatches, name: &str) -> Result<Option<T>>
    where T: std::str::FromStr, T::Err: std::error::Error + 'static
{
    match matches.value_of(name) {
        Some(value) => Ok(Some(value.parse::<T>().map_err(|e| format!("--{}: {}", name, e))?)),
        None => Ok(None)
    }
}

fn machine_config(matches: &ArgMatches) -> Result<MachineConfig> {
    let mut config = MachineConfig::default();
    if let Some(generation) = parse_arg::<MsxGeneration>(matches, "generation")? {
        config.generation = generation;
    }
    if matches.is_present("turbo") {
        if config.generation < MsxGeneration::Msx2Plus {
            config.generation = MsxGeneration::Msx2Plus;
        }
        config.has_turbo = true;
        config.turbo_enabled = true;
    }
    if let Some(wait) = parse_arg(matches, "vdp_wait")? {
        config.vdp_io_wait = wait;
    }
    if let Some(wait) = parse_arg(matches, "rom_wait")? {
        config.rom_wait = wait;
    }
    config.rtc_running = !matches.is_present("no_rtc");
    Ok(config)
}

fn bench_config(matches: &ArgMatches, machine: &MachineConfig) -> Result<BenchConfig> {
    let mut config = BenchConfig { calibration: machine.calibration(), ..BenchConfig::default() };
    if let Some(iterations) = parse_arg(matches, "iterations")? {
        config.iterations = iterations;
    }
    if matches.is_present("rom") {
        config.variant = BuildVariant::Banked;
    }
    config.long_run = !matches.is_present("no_longrun");
    if let Some(path) = matches.value_of("calibration") {
        let file = File::open(path)?;
        let calibration: Calibration = serde_json::from_reader(BufReader::new(file))?;
        debug!("calibration: {:?}", calibration);
        config.calibration = calibration;
    }
    Ok(config)
}

fn run(matches: ArgMatches) -> Result<i32> {
    let machine = machine_config(&matches)?;
    let config = bench_config(&matches, &machine)?;
    let mut msx = MsxMachine::new(machine);
    if config.variant == BuildVariant::Banked {
        let rom = build_rom_image(&TESTS, &config.memory_map);
        msx.insert_cartridge(&rom)?;
    }
    let result = bench::run(&mut msx, &config);
    for line in msx.take_output() {
        println!("{}", line);
    }
    match result {
        Ok(outcome) => {
            if matches.is_present("json") {
                println!("{}", serde_json::to_string_pretty(&outcome.report)?);
            }
            Ok(0)
        }
        Err(err) => {
            error!("{}", err);
            Ok(err.exit_code())
        }
    }
}

fn main() -> Result<()> {
    let matches = clap_app!(vdptest =>
        (version: env!("CARGO_PKG_VERSION"))
        (author: "The VDPTEST Authors")
        (about: "Measures MSX VDP I/O timing on an emulated MSX2")
        (@arg iterations: -i --iterations +takes_value "Repeats of each test per refresh rate (1-128)")
        (@arg rom: --rom "Runs tests from cartridge banks")
        (@arg vdp_wait: --("vdp-wait") +takes_value "Extra wait states of VDP port access")
        (@arg rom_wait: --("rom-wait") +takes_value "Extra wait states of cartridge access")
        (@arg turbo: --turbo "Enables the MSX2+ Z80 turbo mode")
        (@arg generation: -g --generation +takes_value "Emulated generation: 1, 2, 2+ or tr")
        (@arg no_rtc: --("no-rtc") "Stops the real-time clock")
        (@arg no_longrun: --("no-longrun") "Skips the long run clock cross-check")
        (@arg calibration: -c --calibration +takes_value "Loads calibration data from a JSON file")
        (@arg json: --json "Prints the report as JSON")
        (@arg verbose: -v ... "Increases logging verbosity")
    ).get_matches();

    let level = match matches.occurrences_of("verbose") {
        0 => Level::Warn,
        1 => Level::Info,
        2 => Level::Debug,
        _ => Level::Trace
    };
    simple_logger::init_with_level(level)?;

    let code = run(matches)?;
    std::process::exit(code)
}
