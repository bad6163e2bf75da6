use std::{
    fs::File,
    io::{self, Read, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use log::{error, info, warn};

use walfs::{
    device::BlockFile,
    fs::{
        BlockDevice, CacheConfig, EvictionPolicy, FsError, InodeKind, MountOptions, Result,
        Volume, DEFAULT_LOG_SECTORS, FREE_MAP_SECTOR, ROOT_DIR_SECTOR,
    },
};

/// 默认镜像大小: 0x4000 个扇区 (8 MB)
const BLOCK_NUM: usize = 0x4000;

#[derive(Parser)]
#[command(name = "walfs", about = "Crash-consistent block storage on a disk image")]
struct Cli {
    /// Disk image file
    #[arg(long, short, default_value = "target/fs.img")]
    image: PathBuf,

    /// Number of slots in the log region
    #[arg(long, default_value_t = DEFAULT_LOG_SECTORS)]
    log_sectors: u32,

    /// Buffer cache eviction policy
    #[arg(long, value_enum, default_value_t = Policy::Clock)]
    policy: Policy,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum Policy {
    Clock,
    Fifo,
}

#[derive(Subcommand)]
enum Command {
    /// Create (or truncate) the image and format an empty volume on it
    Format {
        /// Image size in sectors
        #[arg(long, default_value_t = BLOCK_NUM)]
        blocks: usize,
    },
    /// Copy a host file into a new inode and print its number
    Put { source: PathBuf },
    /// Copy the contents of an inode to a host file, or to stdout
    Get {
        inumber: u32,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Remove an inode and release its sectors
    Rm { inumber: u32 },
    /// Print volume, log and cache statistics
    Inspect,
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{:<5}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.args()
            )
        })
        .init();
}

fn main() {
    init_logger();
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let options = MountOptions {
        cache: CacheConfig {
            policy: match cli.policy {
                Policy::Clock => EvictionPolicy::Clock,
                Policy::Fifo => EvictionPolicy::Fifo,
            },
            ..CacheConfig::default()
        },
        log_sectors: cli.log_sectors,
    };

    if let Command::Format { blocks } = cli.command {
        let device: Arc<dyn BlockDevice> = Arc::new(BlockFile::create(&cli.image, blocks)?);
        let volume = Volume::format(device, &options)?;
        println!(
            "formatted {:?}: {} sectors, {} free",
            cli.image,
            blocks,
            volume.free_map().free_count()
        );
        volume.shutdown();
        return Ok(());
    }

    let device: Arc<dyn BlockDevice> = Arc::new(BlockFile::open(&cli.image)?);
    let (volume, report) = Volume::mount(device, &options)?;
    if let Some(report) = report {
        warn!(
            "image was not shut down cleanly: {} transactions redone, {} rolled back",
            report.committed,
            report.losers.len()
        );
    }
    // 命令失败时也要正常关闭卷
    let result = match cli.command {
        Command::Put { source } => put(&volume, &source),
        Command::Get { inumber, output } => get(&volume, inumber, output),
        Command::Rm { inumber } => rm(&volume, inumber),
        Command::Inspect => inspect(&volume),
        Command::Format { .. } => unreachable!(),
    };
    volume.shutdown();
    result
}

fn put(volume: &Volume, source: &Path) -> Result<()> {
    let mut data = Vec::new();
    File::open(source)?.read_to_end(&mut data)?;
    let inumber = volume.create_inode(0, InodeKind::File)?;
    let inode = volume.inodes().open(inumber)?;
    let written = inode.write_at(&data, 0);
    if written < data.len() {
        inode.remove();
        volume.inodes().close(inode);
        return Err(FsError::NoSpace);
    }
    volume.inodes().close(inode);
    info!("put {:?} as inode {} ({} bytes)", source, inumber, written);
    println!("{}", inumber);
    Ok(())
}

fn get(volume: &Volume, inumber: u32, output: Option<PathBuf>) -> Result<()> {
    let inode = volume.inodes().open(inumber)?;
    let mut data = vec![0u8; inode.length()];
    let len = inode.read_at(&mut data, 0);
    volume.inodes().close(inode);
    data.truncate(len);
    match output {
        Some(path) => File::create(path)?.write_all(&data)?,
        None => io::stdout().write_all(&data)?,
    }
    Ok(())
}

fn rm(volume: &Volume, inumber: u32) -> Result<()> {
    if inumber == FREE_MAP_SECTOR || inumber == ROOT_DIR_SECTOR {
        return Err(FsError::Format(format!("inode {} is reserved", inumber)));
    }
    let inode = volume.inodes().open(inumber)?;
    inode.remove();
    volume.inodes().close(inode);
    info!("removed inode {}", inumber);
    Ok(())
}

fn inspect(volume: &Volume) -> Result<()> {
    let free_map = volume.free_map();
    let wal = volume.wal();
    let geometry = wal.geometry();
    let root = volume.root_inode()?;
    println!("sectors:      {} total, {} free", free_map.total(), free_map.free_count());
    println!(
        "log:          sectors [{}, {}), meta at {}",
        geometry.log_start,
        geometry.meta_sector(),
        geometry.meta_sector()
    );
    println!("next lsn:     {}", wal.next_lsn());
    println!("flushed lsn:  {}", wal.flushed_lsn());
    println!("root dir:     {} bytes", root.length());
    volume.inodes().close(root);
    let stats = volume.cache().stats();
    println!(
        "cache:        {} hits, {} misses, {} evictions, {} write-backs",
        stats.hits, stats.misses, stats.evictions, stats.writebacks
    );
    Ok(())
}
