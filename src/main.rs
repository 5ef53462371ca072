//! slotdb - inspect and edit a slotted-page object volume

use anyhow::{bail, Context, Result};
use clap::{Parser as ClapParser, Subcommand};
use slotdb::catalog::{CATALOG_PAGE, CatalogRef};
use slotdb::config::StoreOptions;
use slotdb::database::Database;
use slotdb::object::{DeallocList, ObjectId, ScanDirection};
use slotdb::storage::page::ObjectHeader;
use std::path::PathBuf;

/// slotdb - object storage on slotted pages
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Volume file
    #[arg(short = 'f', long, default_value = "./slotdb.vol")]
    volume_file: PathBuf,

    /// Buffer pool size in pages
    #[arg(short = 'b', long, default_value = "64")]
    buffer_frames: usize,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an empty volume
    Init {
        /// Volume number stamped on pages and object ids
        #[arg(long, default_value = "1")]
        volume: u16,
    },
    /// Create a data file and print its catalog entry number
    CreateFile {
        /// Extent fill factor in percent
        #[arg(long, default_value = "100")]
        fill_factor: u16,
    },
    /// Store an object and print its id
    Insert {
        /// Catalog entry of the file
        file: u16,
        /// Object contents
        data: String,
        /// Place the object close to this object id (volume:page:slot:unique)
        #[arg(long)]
        near: Option<ObjectId>,
        /// Tag recorded in the object header
        #[arg(long, default_value = "0")]
        tag: u16,
    },
    /// Destroy an object and release any page it emptied
    Delete { file: u16, oid: ObjectId },
    /// Print one object
    Get { file: u16, oid: ObjectId },
    /// List the objects of a file in file order
    Scan {
        file: u16,
        #[arg(short, long)]
        reverse: bool,
    },
    /// Print per-page space accounting of a file
    Stats { file: u16 },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let options = StoreOptions {
        buffer_pool_frames: args.buffer_frames,
        ..Default::default()
    };

    let command = match args.command {
        Command::Init { volume } => {
            let options = StoreOptions { volume, ..options };
            Database::create(&args.volume_file, options).context("Failed to create volume")?;
            println!("created volume {} at {}", volume, args.volume_file.display());
            return Ok(());
        }
        command => command,
    };

    let db = Database::open(&args.volume_file, options).context("Failed to open volume")?;
    run(&db, command)?;
    db.flush()?;
    Ok(())
}

fn run(db: &Database, command: Command) -> Result<()> {
    match command {
        Command::Init { .. } => bail!("Volume is already initialized"),
        Command::CreateFile { fill_factor } => {
            let file = db.catalog().create_file(fill_factor)?;
            println!("{}", file.entry);
        }
        Command::Insert {
            file,
            data,
            near,
            tag,
        } => {
            let header = ObjectHeader::new(0, tag);
            let oid = db
                .objects()
                .create_object(file_ref(db, file)?, near, Some(&header), data.as_bytes())?;
            println!("{}", oid);
        }
        Command::Delete { file, oid } => {
            let mut dealloc = DeallocList::new();
            db.objects().destroy_object(file_ref(db, file)?, oid, &mut dealloc)?;
            let released = db.release_deallocated(&mut dealloc)?;
            println!("destroyed {} ({} page(s) released)", oid, released);
        }
        Command::Get { file, oid } => {
            let object = db.objects().read_object(file_ref(db, file)?, oid)?;
            println!(
                "{} tag={} props={} len={} {}",
                object.id,
                object.header.tag,
                object.header.properties,
                object.header.length,
                String::from_utf8_lossy(&object.data)
            );
        }
        Command::Scan { file, reverse } => {
            let direction = if reverse {
                ScanDirection::Backward
            } else {
                ScanDirection::Forward
            };
            let mut count = 0;
            for item in db.objects().scan(file_ref(db, file)?, direction) {
                let (oid, header) = item?;
                println!("{} tag={} len={}", oid, header.tag, header.length);
                count += 1;
            }
            println!("({} objects)", count);
        }
        Command::Stats { file } => {
            println!(
                "{:>6} {:>6} {:>6} {:>6} {:>6} {:>6} {:>6}  list",
                "page", "slots", "live", "free", "unused", "cfree", "total"
            );
            for page in db.objects().file_pages(file_ref(db, file)?)? {
                println!(
                    "{:>6} {:>6} {:>6} {:>6} {:>6} {:>6} {:>6}  {}",
                    page.page_id.0,
                    page.n_slots,
                    page.live_objects,
                    page.free,
                    page.unused,
                    page.contiguous_free,
                    page.total_free,
                    page.space_list
                        .map_or_else(|| "-".to_string(), |b| format!("{}%", b.percent()))
                );
            }
        }
    }
    Ok(())
}

fn file_ref(db: &Database, entry: u16) -> Result<CatalogRef> {
    let file = CatalogRef::new(CATALOG_PAGE, entry);
    if !db.files()?.iter().any(|(f, _)| *f == file) {
        bail!("No data file with catalog entry {}", entry);
    }
    Ok(file)
}
