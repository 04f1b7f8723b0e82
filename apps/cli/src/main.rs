mod store;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use geotree_project::{
    BoundingBox, CodecConfig, GeometryType, MetadataValue, NodeId, NodeType, ProjectTree,
};
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::store::ProjectFile;

#[derive(Parser)]
#[command(
    name = "geotree-cli",
    about = "Inspect and edit geospatial project trees",
    author,
    version
)]
struct Cli {
    /// 編解碼設定檔（JSON）。 / Codec settings file (JSON).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// 提高日誌詳細程度。 / Raise log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 建立僅含根資料夾的專案。 / Create a project holding only a root folder.
    New(NewArgs),
    /// 以縮排大綱列出專案。 / Print the project as an indented outline.
    Show(ShowArgs),
    /// 解析並重新輸出專案文件。 / Parse and re-emit a project document.
    Fmt(FmtArgs),
    /// 在父節點下新增節點。 / Append a node under a parent.
    Add(AddArgs),
    /// 移除節點及其所有子節點。 / Remove a node and everything below it.
    Remove(NodeArgs),
    /// 重新命名節點。 / Rename a node.
    Rename(RenameArgs),
    /// 移動節點或調整順序。 / Move a node under another parent or reorder it.
    Move(MoveArgs),
    /// 讀取或寫入中繼資料。 / Read or write a metadata entry.
    Meta(MetaArgs),
    /// 取代節點的幾何資料。 / Replace a node's geometry.
    Geometry(GeometryArgs),
}

#[derive(Args)]
struct NewArgs {
    #[arg(value_name = "FILE")]
    file: PathBuf,
    /// 根資料夾名稱。 / Name of the root folder.
    #[arg(long, default_value = "Project")]
    name: String,
    /// 覆寫既有檔案。 / Overwrite an existing file.
    #[arg(long)]
    force: bool,
}

#[derive(Args)]
struct ShowArgs {
    #[arg(value_name = "FILE")]
    file: PathBuf,
}

#[derive(Args)]
struct FmtArgs {
    #[arg(value_name = "FILE")]
    file: PathBuf,
    /// 輸出至此路徑而非覆寫原檔。 / Write to this path instead of rewriting FILE.
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct AddArgs {
    #[arg(value_name = "FILE")]
    file: PathBuf,
    /// 父節點識別碼，或 `root`。 / Parent node id, or `root`.
    #[arg(long, default_value = "root")]
    parent: String,
    /// 節點類型字串。 / Type tag (UDS, POI, Folder, IOT, Media, Camera, VizSet or a custom tag of up to 7 bytes).
    #[arg(long = "type", value_name = "TAG")]
    node_type: String,
    #[arg(long)]
    name: String,
    #[arg(long, default_value = "")]
    uri: String,
    /// 邊界範圍。 / Bounds as west,south,floor,east,north,ceiling.
    #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
    bbox: Option<Vec<f64>>,
}

#[derive(Args)]
struct NodeArgs {
    #[arg(value_name = "FILE")]
    file: PathBuf,
    /// 節點識別碼，或 `root`。 / Node id, or `root`.
    #[arg(value_name = "NODE")]
    node: String,
}

#[derive(Args)]
struct RenameArgs {
    #[command(flatten)]
    target: NodeArgs,
    name: String,
}

#[derive(Args)]
struct MoveArgs {
    #[command(flatten)]
    target: NodeArgs,
    /// 新的父節點識別碼，或 `root`。 / New parent node id, or `root`.
    #[arg(long, value_name = "NODE")]
    to: String,
    /// 插入於此兄弟節點之前；略過則加在最後。 / Sibling to insert before; appended last when omitted.
    #[arg(long, value_name = "NODE")]
    before: Option<String>,
}

#[derive(Args)]
struct MetaArgs {
    #[command(flatten)]
    target: NodeArgs,
    key: String,
    /// 要寫入的值；略過時列出目前的值。 / Value to store; prints the current value when omitted.
    #[arg(allow_hyphen_values = true)]
    value: Option<String>,
    #[arg(long, value_enum, default_value_t = MetaKind::String)]
    kind: MetaKind,
}

#[derive(Args)]
struct GeometryArgs {
    #[command(flatten)]
    target: NodeArgs,
    #[arg(long = "type", value_enum)]
    geometry_type: GeometryChoice,
    /// 攤平的 x,y,z 座標。 / Flattened x,y,z coordinates.
    #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
    coords: Vec<f64>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum MetaKind {
    Int32,
    Uint32,
    Int64,
    Double,
    Bool,
    String,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum GeometryChoice {
    None,
    Point,
    MultiPoint,
    LineString,
    MultiLineString,
    Polygon,
    MultiPolygon,
    GeometryCollection,
}

impl From<GeometryChoice> for GeometryType {
    fn from(choice: GeometryChoice) -> Self {
        match choice {
            GeometryChoice::None => GeometryType::None,
            GeometryChoice::Point => GeometryType::Point,
            GeometryChoice::MultiPoint => GeometryType::MultiPoint,
            GeometryChoice::LineString => GeometryType::LineString,
            GeometryChoice::MultiLineString => GeometryType::MultiLineString,
            GeometryChoice::Polygon => GeometryType::Polygon,
            GeometryChoice::MultiPolygon => GeometryType::MultiPolygon,
            GeometryChoice::GeometryCollection => GeometryType::GeometryCollection,
        }
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let Cli {
        config,
        verbose,
        command,
    } = Cli::parse();
    init_tracing(verbose);
    let config = load_config(config.as_deref())?;

    match command {
        Commands::New(args) => execute_new(args, config),
        Commands::Show(args) => execute_show(args, config),
        Commands::Fmt(args) => execute_fmt(args, config),
        Commands::Add(args) => execute_add(args, config),
        Commands::Remove(args) => edit(&args, config, |tree, id| {
            let parent = tree.node(id)?.parent().unwrap_or(id);
            tree.remove_child(parent, id)?;
            Ok(())
        }),
        Commands::Rename(args) => edit(&args.target, config, |tree, id| {
            tree.set_name(id, args.name.as_str())?;
            Ok(())
        }),
        Commands::Move(args) => execute_move(args, config),
        Commands::Meta(args) => execute_meta(args, config),
        Commands::Geometry(args) => edit(&args.target, config, |tree, id| {
            tree.set_geometry(id, args.geometry_type.into(), args.coords.clone())?;
            Ok(())
        }),
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: Option<&Path>) -> Result<CodecConfig> {
    let Some(path) = path else {
        return Ok(CodecConfig::default());
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let mut config: CodecConfig = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    config.sanitize();
    Ok(config)
}

fn execute_new(args: NewArgs, config: CodecConfig) -> Result<()> {
    let file = ProjectFile::new(&args.file, config);
    if file.exists() && !args.force {
        bail!(
            "{} already exists (use --force to overwrite)",
            args.file.display()
        );
    }
    let mut tree = ProjectTree::new_empty(args.name);
    file.save(&mut tree)?;
    println!("{}", tree.root().uuid());
    Ok(())
}

fn execute_show(args: ShowArgs, config: CodecConfig) -> Result<()> {
    let tree = ProjectFile::new(&args.file, config).load()?;
    for (node, depth) in tree.depth_first() {
        let mut line = format!(
            "{}{} [{}]",
            "  ".repeat(depth),
            display_name(node.name()),
            node.node_type()
        );
        if !node.uri().is_empty() {
            line.push_str(&format!(" <{}>", node.uri()));
        }
        if !node.geometry().is_none() {
            line.push_str(&format!(" {}", node.geometry().geometry_type()));
        }
        line.push_str(&format!(" ({})", node.uuid()));
        println!("{line}");
    }
    Ok(())
}

fn execute_fmt(args: FmtArgs, config: CodecConfig) -> Result<()> {
    let mut tree = ProjectFile::new(&args.file, config.clone()).load()?;
    let target = args.output.unwrap_or(args.file);
    ProjectFile::new(&target, config).save(&mut tree)?;
    info!(path = %target.display(), "formatted project");
    Ok(())
}

fn execute_add(args: AddArgs, config: CodecConfig) -> Result<()> {
    let file = ProjectFile::new(&args.file, config);
    let mut tree = file.load()?;
    let parent = resolve_node(&tree, &args.parent)?;
    let node_type = NodeType::from_tag(&args.node_type);
    let id = tree.create_child(parent, node_type, args.name, args.uri)?;
    if let Some(values) = args.bbox {
        let values: [f64; 6] = values
            .try_into()
            .map_err(|_| anyhow!("--bbox needs exactly six values"))?;
        tree.set_bounding_box(id, Some(BoundingBox::from_array(values)))?;
    }
    let uuid = tree.node(id)?.uuid().to_string();
    file.save(&mut tree)?;
    println!("{uuid}");
    Ok(())
}

fn execute_move(args: MoveArgs, config: CodecConfig) -> Result<()> {
    let to = args.to;
    let before = args.before;
    edit(&args.target, config, |tree, id| {
        let new_parent = resolve_node(tree, &to)?;
        let before = before
            .as_deref()
            .map(|value| resolve_node(tree, value))
            .transpose()?;
        let current_parent = tree.node(id)?.parent().unwrap_or(id);
        tree.move_child(current_parent, new_parent, id, before)?;
        Ok(())
    })
}

fn execute_meta(args: MetaArgs, config: CodecConfig) -> Result<()> {
    let Some(raw) = args.value else {
        let tree = ProjectFile::new(&args.target.file, config).load()?;
        let id = resolve_node(&tree, &args.target.node)?;
        match tree.node(id)?.metadata().get_value(&args.key) {
            Some(value) => println!("{}", format_metadata(value)),
            None => bail!("no metadata entry named {:?}", args.key),
        }
        return Ok(());
    };
    let value = parse_metadata(args.kind, &raw)?;
    edit(&args.target, config, |tree, id| {
        tree.set_metadata(id, args.key.as_str(), value)?;
        Ok(())
    })
}

/// Loads FILE, applies `change` to NODE and writes back if anything changed.
fn edit<F>(target: &NodeArgs, config: CodecConfig, change: F) -> Result<()>
where
    F: FnOnce(&mut ProjectTree, NodeId) -> Result<()>,
{
    let file = ProjectFile::new(&target.file, config);
    let mut tree = file.load()?;
    let id = resolve_node(&tree, &target.node)?;
    change(&mut tree, id)?;
    if tree.has_unsaved_changes() {
        file.save(&mut tree)?;
    }
    Ok(())
}

fn resolve_node(tree: &ProjectTree, value: &str) -> Result<NodeId> {
    if value == "root" {
        return Ok(tree.root_id());
    }
    tree.find_by_uuid(value)
        .ok_or_else(|| anyhow!("no node with id {value:?}"))
}

fn parse_metadata(kind: MetaKind, raw: &str) -> Result<MetadataValue> {
    let invalid = || format!("{raw:?} is not a valid {kind:?} value");
    let value = match kind {
        MetaKind::Int32 => MetadataValue::Int32(raw.parse().with_context(invalid)?),
        MetaKind::Uint32 => MetadataValue::UInt32(raw.parse().with_context(invalid)?),
        MetaKind::Int64 => MetadataValue::Int64(raw.parse().with_context(invalid)?),
        MetaKind::Double => MetadataValue::Double(raw.parse().with_context(invalid)?),
        MetaKind::Bool => MetadataValue::Bool(raw.parse().with_context(invalid)?),
        MetaKind::String => MetadataValue::String(raw.to_string()),
    };
    Ok(value)
}

fn format_metadata(value: &MetadataValue) -> String {
    let text = match value {
        MetadataValue::Int32(inner) => inner.to_string(),
        MetadataValue::UInt32(inner) => inner.to_string(),
        MetadataValue::Int64(inner) => inner.to_string(),
        MetadataValue::Double(inner) => inner.to_string(),
        MetadataValue::Bool(inner) => inner.to_string(),
        MetadataValue::String(inner) => inner.clone(),
    };
    format!("{text} ({})", value.kind())
}

fn display_name(name: &str) -> &str {
    if name.is_empty() {
        "(unnamed)"
    } else {
        name
    }
}
