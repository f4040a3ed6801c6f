//! Inspect the known SPI NAND chips: geometry, OOB layouts, ECC status decoding.
//!
//! `verify` checks every chip's layout and round-trips free OOB bytes through a simulated NAND of
//! that chip's geometry, so it doubles as a self-test.

use anyhow::{bail, ensure, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};

use std::thread;
use std::time::Duration;

use esmt_spinand::{
    nand::{
        ooblayout::{self, byte_map, check_layout, OobKind, OobLayout},
        program_with_free_bytes, read_free_bytes, Nand, NandLayout, SimNand,
    },
    spinand::{all_chips, lookup_chip, op::BusCaps, ChipDescriptor},
    util::{hex_bytes, parse_u8},
};

/// How many blocks to simulate when verifying a chip; the layout doesn't care about the rest
const VERIFY_BLOCKS: u32 = 4;

#[derive(Args, Debug)]
struct ChipId {
    /// Manufacturer ID byte (e.g. 0xC8)
    #[clap(long, value_parser = parse_u8)]
    mfr: u8,

    /// Device ID byte(s) following the manufacturer ID
    #[clap(long, value_parser = parse_u8, num_args = 1.., required = true)]
    dev: Vec<u8>,
}

impl ChipId {
    fn lookup(&self) -> Result<&'static ChipDescriptor> {
        Ok(lookup_chip(self.mfr, &self.dev)?)
    }
}

/// Which lines the SPI bus has wired up
#[derive(ValueEnum, Debug, Copy, Clone)]
enum Bus {
    Single,
    Dual,
    Quad,
}

impl From<Bus> for BusCaps {
    fn from(value: Bus) -> Self {
        match value {
            Bus::Single => BusCaps::empty(),
            Bus::Dual => BusCaps::TX_DUAL | BusCaps::RX_DUAL,
            Bus::Quad => BusCaps::all(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every known chip
    List,

    /// Describe one chip in detail
    Show {
        #[clap(flatten)]
        chip: ChipId,

        /// The bus to pick cache operations for
        #[clap(long, value_enum, default_value = "quad")]
        bus: Bus,
    },

    /// Draw which spare-area bytes are ECC, free, or reserved
    OobDump {
        #[clap(flatten)]
        chip: ChipId,
    },

    /// Decode a status register value read after a page read
    DecodeStatus {
        #[clap(flatten)]
        chip: ChipId,

        /// The status register value
        #[clap(value_parser = parse_u8)]
        status: u8,
    },

    /// Check every chip's layout and exercise it on a simulated NAND
    Verify,
}

impl Command {
    fn execute(self) -> Result<()> {
        match self {
            Command::List => {
                for (mfr, chip) in all_chips() {
                    let layout = NandLayout::from(&chip.memorg);
                    println!(
                        "{:02x} {:8}  {:5} {:11}  {}x{}x{}+{}",
                        mfr.id,
                        hex_bytes(chip.devid.id),
                        mfr.name,
                        chip.model,
                        layout.blocks,
                        layout.pages_per_block,
                        layout.bytes_per_page,
                        layout.oob_bytes_per_page,
                    );
                }
            }

            Command::Show { chip, bus } => show(chip.lookup()?, bus.into())?,

            Command::OobDump { chip } => {
                let chip = chip.lookup()?;
                let map = byte_map(chip.ooblayout(), chip.oobsize());
                for (row, bytes) in map.chunks(16).enumerate() {
                    let drawn: String = bytes.iter().map(|x| x.symbol()).collect();
                    println!("{:3}: {drawn}", row * 16);
                }
                println!("B = bad block marker, E = ECC, F = free, . = reserved, X = conflict");
            }

            Command::DecodeStatus { chip, status } => {
                let chip = chip.lookup()?;
                match chip.decode_ecc_status(status) {
                    Ok(0) => println!("{}: no bitflips", chip.model),
                    Ok(n) if chip.reports_bitflips() => {
                        println!("{}: up to {n} bitflips corrected", chip.model)
                    }
                    Ok(n) => println!(
                        "{}: bitflips corrected (count not reported, at most {n})",
                        chip.model
                    ),
                    Err(e) => bail!("{}: {e}", chip.model),
                }
            }

            Command::Verify => verify()?,
        };

        Ok(())
    }
}

fn show(chip: &ChipDescriptor, caps: BusCaps) -> Result<()> {
    let memorg = &chip.memorg;
    println!("Model:       {}", chip.model);
    println!("Device ID:   {} ({:?})", hex_bytes(chip.devid.id), chip.devid.method);
    println!(
        "Geometry:    {} blocks x {} pages x ({} + {}) bytes, {} plane(s), {} MiB",
        memorg.total_eraseblocks(),
        memorg.pages_per_eraseblock,
        memorg.pagesize,
        memorg.oobsize,
        memorg.planes_per_lun,
        memorg.total_size() >> 20,
    );
    println!(
        "Bad blocks:  at most {} per LUN",
        memorg.max_bad_eraseblocks_per_lun
    );
    println!(
        "ECC:         {} bit(s) per {} bytes, status decoder: {}",
        chip.eccreq.strength,
        chip.eccreq.step_size,
        if chip.reports_bitflips() {
            "bitflip count"
        } else {
            "generic"
        }
    );

    match chip.op_variants.select(caps) {
        Some(ops) => {
            println!("Read cache:   {}", ops.read_cache);
            println!("Write cache:  {}", ops.write_cache);
            println!("Update cache: {}", ops.update_cache);
        }
        None => println!("No usable cache operations on this bus"),
    }

    let layout = chip.ooblayout();
    let oobsize = chip.oobsize();
    println!("Section  ECC (offset+len)  Free (offset+len)");
    for section in 0..ooblayout::section_count(layout, oobsize) {
        let ecc = layout.ecc(oobsize, section)?;
        let free = layout.free(oobsize, section)?;
        println!(
            "{section:7}  {:>9}+{:<7}  {:>9}+{:<7}",
            ecc.offset, ecc.length, free.offset, free.length
        );
    }
    println!(
        "Totals:  {} ECC bytes, {} free bytes",
        ooblayout::count_bytes(layout, OobKind::Ecc, oobsize),
        ooblayout::count_bytes(layout, OobKind::Free, oobsize)
    );

    Ok(())
}

/// Write a pattern into the free bytes of a simulated page and make sure it reads back, without
/// disturbing the bad block marker
fn exercise_free_bytes(chip: &ChipDescriptor) -> Result<()> {
    let layout = NandLayout {
        blocks: VERIFY_BLOCKS,
        ..NandLayout::from(&chip.memorg)
    };
    let oob_layout = chip.ooblayout();
    let free_len = ooblayout::count_bytes(oob_layout, OobKind::Free, chip.oobsize());

    let mut nand = SimNand::new(layout);
    let geometry = nand.get_layout();
    ensure!(
        geometry.raw_page_size() == chip.memorg.pagesize as usize + chip.oobsize(),
        "simulated page size doesn't match the chip"
    );

    let pattern: Vec<u8> = (0..free_len).map(|x| x as u8 ^ 0xA5).collect();
    let data = vec![0x00; geometry.bytes_per_page];

    let Some(mut block) = nand.block(0)? else {
        bail!("fresh simulated block is bad");
    };
    program_with_free_bytes(&mut block, oob_layout, 0, &data, &pattern)?;

    let mut readback = vec![0; free_len];
    read_free_bytes(&block, oob_layout, 0, &mut readback)?;
    if readback != pattern {
        bail!("free bytes did not read back");
    }

    if nand.block(0)?.is_none() {
        bail!("writing free bytes marked the block bad");
    }

    Ok(())
}

fn verify() -> Result<()> {
    let chips: Vec<_> = all_chips().collect();
    let rpt = howudoin::new()
        .label("Verifying chips")
        .set_len(u64::try_from(chips.len()).ok());

    let mut failures = 0;
    for (mfr, chip) in chips {
        rpt.desc(chip.model);

        let result = check_layout(chip.ooblayout(), chip.oobsize())
            .and_then(|_| exercise_free_bytes(chip));
        match result {
            Ok(()) => {
                rpt.add_info(format!("{} {}: ok", mfr.name, chip.model));
            }
            Err(e) => {
                rpt.add_err(format!("{} {}: {e:#}", mfr.name, chip.model));
                failures += 1;
            }
        }

        rpt.inc();
    }

    rpt.close();

    if failures != 0 {
        bail!("{failures} chip(s) failed verification");
    }

    Ok(())
}

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Cli {
    #[clap(subcommand)]
    cmd: Command,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    howudoin::init(howudoin::consumers::TermLine::default());

    let result = args.cmd.execute();
    howudoin::disable();
    thread::sleep(Duration::from_millis(10)); // Give howudoin time to shut down
    result
}

#[test]
fn test_cli_parse() {
    use clap::CommandFactory;
    Cli::command().debug_assert();

    let cli = Cli::try_parse_from(["spinand_info", "oob-dump", "--mfr", "0xC8", "--dev", "0x41"])
        .unwrap();
    let Command::OobDump { chip } = cli.cmd else {
        panic!("expected the oob-dump subcommand");
    };
    assert_eq!(chip.lookup().unwrap().model, "F50L2G41KA");

    let renamed = ["spinand_info", "oob-map", "--mfr", "0xC8", "--dev", "1"];
    assert!(Cli::try_parse_from(renamed).is_err());
}

#[test]
fn test_exercise_free_bytes() {
    for (_, chip) in all_chips() {
        exercise_free_bytes(chip).unwrap();
    }
}
