use std::fs;
use std::io::Read as _;
use std::path::PathBuf;

use chrono::Utc;
use clap::{arg, command, ArgMatches, Command};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use space_command::archive::Archive;
use space_command::ccsds::{self, EphemPoint, Ephemeris, OrbitData, OrbitKind, Propagator, StateVector};
use space_command::error::{Error, Result};
use space_command::fetch;
use space_command::request::{self, Limit, Overrides, Source};
use space_command::sat::{self, Orb, Resolver, Sat, SatStore, SyncSource};
use space_command::tle::TleStore;
use space_command::wspace::Workspace;

fn cli() -> Command {
    command!()
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(arg!(-w --workspace [DIR] "Workspace directory (default $SPACE_WORKSPACE or ~/.space)").global(true))
        .subcommand(
            Command::new("sat")
                .about("Satellite registry")
                .subcommand_required(true)
                .subcommand(
                    Command::new("alias")
                        .about("Bind a name to a selector")
                        .arg(arg!(<NAME> "Alias name"))
                        .arg(arg!(<SELECTOR> "Selector the alias expands to"))
                        .arg(arg!(-f --force "Overwrite an existing alias")),
                )
                .subcommand(Command::new("aliases").about("List the defined aliases"))
                .subcommand(
                    Command::new("infos")
                        .about("Registry entry of a satellite")
                        .arg(arg!(<SELECTOR> "Satellite selector")),
                )
                .subcommand(
                    Command::new("orb")
                        .about("Orbit record a selector resolves to")
                        .arg(arg!(<SELECTOR> "Satellite selector")),
                )
                .subcommand(
                    Command::new("sync")
                        .about("Reconcile the registry with the TLE database and the archive")
                        .arg(arg!([SOURCE] "all, tle or ephem").default_value("all")),
                ),
        )
        .subcommand(
            Command::new("tle")
                .about("TLE database")
                .subcommand_required(true)
                .subcommand(
                    Command::new("get")
                        .about("Latest (or dated, or offset) TLE of satellites")
                        .arg(arg!(<SELECTOR> ... "Satellite selectors")),
                )
                .subcommand(
                    Command::new("insert")
                        .about("Insert TLEs from files or stdin")
                        .arg(arg!([FILE] ... "Files to read ('-' or none for stdin)")),
                )
                .subcommand(
                    Command::new("fetch")
                        .about("Download TLE pages from Celestrak")
                        .arg(arg!([FILE] ... "Page names (default: all known pages)")),
                )
                .subcommand(
                    Command::new("fetch-st")
                        .about("Download the latest TLE of one object from Space-Track")
                        .arg(arg!(<SELECTOR> "Satellite selector")),
                )
                .subcommand(
                    Command::new("find")
                        .about("Search satellites by name or raw TLE text")
                        .arg(arg!(<TEXT> "Substring to search for")),
                )
                .subcommand(
                    Command::new("history")
                        .about("All stored TLEs of satellites, oldest first")
                        .arg(
                            arg!(-l --last [N] "Only the N most recent records")
                                .value_parser(clap::value_parser!(usize)),
                        )
                        .arg(arg!(<SELECTOR> ... "Satellite selectors")),
                )
                .subcommand(
                    Command::new("dump")
                        .about("Every latest-per-object TLE in 3le format")
                        .arg(arg!(-a --all "Every stored record, not only the latest")),
                )
                .subcommand(Command::new("stats").about("Database statistics")),
        )
        .subcommand(orbit_cmd("oem", "OEM ephemeris archive"))
        .subcommand(orbit_cmd("opm", "OPM state-vector archive"))
}

/// The `oem` and `opm` sub-trees are identical apart from the file kind.
fn orbit_cmd(name: &'static str, about: &'static str) -> Command {
    Command::new(name)
        .about(about)
        .subcommand_required(true)
        .subcommand(
            Command::new("get")
                .about("Print an archived file")
                .arg(arg!(<SELECTOR> "Satellite selector")),
        )
        .subcommand(
            Command::new("insert")
                .about("Archive a CCSDS file read from a file or stdin")
                .arg(arg!([FILE] "File to read ('-' or none for stdin)"))
                .arg(arg!(-f --force "Overwrite an existing archive file")),
        )
        .subcommand(
            Command::new("list")
                .about("Archived files of a satellite, newest first")
                .arg(
                    arg!(-l --last [N] "Only the N most recent files")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(arg!(<SELECTOR> "Satellite selector")),
        )
        .subcommand(
            Command::new("compute")
                .about("Propagate a TLE and print or archive the result")
                .arg(arg!(<SELECTOR> "Satellite selector (resolved against the TLE database)"))
                .arg(arg!(--date [DATE] "Start date (default now)"))
                .arg(arg!(--range [DURATION] "Time span, e.g. 1d or 12h (OEM only)"))
                .arg(arg!(--step [DURATION] "Step between states, e.g. 3m (OEM only)"))
                .arg(arg!(-i --insert "Archive the result instead of printing it"))
                .arg(arg!(-f --force "Overwrite an existing archive file")),
        )
        .subcommand(
            Command::new("tag")
                .about("Bind a tag to the file a selector resolves to")
                .arg(arg!(<SELECTOR> "Satellite selector"))
                .arg(arg!(<TAG> "Tag name"))
                .arg(arg!(-f --force "Move the tag if it already exists")),
        )
        .subcommand(
            Command::new("tags")
                .about("Tags defined for a satellite")
                .arg(arg!(<SELECTOR> "Satellite selector")),
        )
        .subcommand(
            Command::new("purge")
                .about("Delete old archive files (tagged files are kept)")
                .arg(arg!(<SELECTOR> "Satellite selector"))
                .arg(
                    arg!(--until [WHEN] "Date, or age like 4w (default 4w)")
                        .default_value("4w"),
                )
                .arg(arg!(-y --yes "Delete without listing for confirmation")),
        )
}

struct Ctx {
    ws: Workspace,
    sats: SatStore,
    tles: TleStore,
    archive: Archive,
}

impl Ctx {
    async fn open(matches: &ArgMatches) -> Result<Self> {
        let root = matches
            .get_one::<String>("workspace")
            .map(PathBuf::from)
            .unwrap_or_else(Workspace::default_root);
        let ws = Workspace::open(root).await?;
        let sats = SatStore::new(ws.db.clone());
        let tles = TleStore::new(ws.db.clone());
        let archive = Archive::new(ws.satdb_dir());
        Ok(Ctx {
            ws,
            sats,
            tles,
            archive,
        })
    }

    fn resolver(&self) -> Resolver<'_> {
        Resolver {
            sats: &self.sats,
            tles: &self.tles,
            archive: &self.archive,
        }
    }

    fn originator(&self) -> &str {
        &self.ws.config.center.name
    }

    async fn auto_sync(&self) -> Result<()> {
        if self.ws.config.satellites.auto_sync_tle {
            sat::sync(&self.sats, &self.tles, &self.archive, SyncSource::Tle).await?;
        }
        Ok(())
    }
}

fn arg_str<'a>(matches: &'a ArgMatches, id: &str) -> &'a str {
    matches
        .get_one::<String>(id)
        .map(String::as_str)
        .unwrap_or_default()
}

fn arg_all(matches: &ArgMatches, id: &str) -> Option<Vec<String>> {
    matches
        .get_many::<String>(id)
        .map(|values| values.cloned().collect())
}

/// Read a file argument, `-` and absence both meaning stdin.
fn read_input(file: Option<&str>) -> Result<String> {
    match file {
        Some(path) if path != "-" => Ok(fs::read_to_string(path)?),
        _ => {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text)?;
            Ok(text)
        }
    }
}

fn tle_overrides() -> Overrides {
    Overrides {
        src: Some(Source::Tle),
        ..Default::default()
    }
}

fn kind_overrides(kind: OrbitKind) -> Overrides {
    Overrides {
        src: Some(match kind {
            OrbitKind::Oem => Source::Oem,
            OrbitKind::Opm => Source::Opm,
        }),
        ..Default::default()
    }
}

fn print_orb(orb: &Orb, originator: &str) {
    match orb {
        Orb::Tle(tle) => println!("{}\n{}", tle.name, tle.data),
        Orb::Ccsds(orbit) => print!("{}", ccsds::dumps(orbit, originator)),
    }
}

async fn run_sat(ctx: &Ctx, matches: &ArgMatches) -> Result<()> {
    let default_src = ctx.ws.config.default_src();
    match matches.subcommand() {
        Some(("alias", m)) => {
            let name = arg_str(m, "NAME");
            let selector = arg_str(m, "SELECTOR");
            // The target must exist before the alias is worth anything.
            let req = ctx
                .sats
                .parse_selector(selector, &Overrides::default(), &default_src)
                .await?;
            ctx.resolver().resolve(&req, false, false).await?;
            ctx.sats
                .set_alias(name, &format!("{}={}", req.selector, req.value), m.get_flag("force"))
                .await
        }
        Some(("aliases", _)) => {
            for (name, selector) in ctx.sats.aliases().await? {
                println!("{name:<16} {selector}");
            }
            Ok(())
        }
        Some(("infos", m)) => {
            let sat = ctx
                .resolver()
                .from_selector(arg_str(m, "SELECTOR"), &Overrides::default(), &default_src, false)
                .await?;
            println!("name       {}", sat.name());
            match sat.norad_id() {
                Some(norad) => println!("norad_id   {norad}"),
                None => println!("norad_id   -"),
            }
            match sat.cospar_id() {
                Some(cospar) => {
                    println!("cospar_id  {cospar}");
                    println!("folder     {}", ctx.archive.folder(cospar)?.display());
                }
                None => println!("cospar_id  -"),
            }
            Ok(())
        }
        Some(("orb", m)) => {
            let sat = ctx
                .resolver()
                .from_selector(arg_str(m, "SELECTOR"), &Overrides::default(), &default_src, true)
                .await?;
            if let Some(orb) = &sat.orb {
                print_orb(orb, ctx.originator());
            }
            Ok(())
        }
        Some(("sync", m)) => {
            let source = SyncSource::parse(arg_str(m, "SOURCE"))?;
            let (created, updated) =
                sat::sync(&ctx.sats, &ctx.tles, &ctx.archive, source).await?;
            println!("{created} created, {updated} updated");
            Ok(())
        }
        _ => Ok(()),
    }
}

async fn run_tle(ctx: &Ctx, matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("get", m)) => {
            for selector in arg_all(m, "SELECTOR").unwrap_or_default() {
                let sat = ctx
                    .resolver()
                    .from_selector(&selector, &tle_overrides(), &Source::Tle, true)
                    .await?;
                if let Some(orb) = &sat.orb {
                    print_orb(orb, ctx.originator());
                }
            }
            Ok(())
        }
        Some(("insert", m)) => {
            // One unreadable or TLE-less file never blocks the others,
            // and the registry sync runs either way.
            let mut batches: Vec<(String, String)> = Vec::new();
            match arg_all(m, "FILE") {
                None => batches.push(("stdin".to_string(), read_input(None)?)),
                Some(files) => {
                    for file in &files {
                        let src = if file == "-" { "stdin" } else { file.as_str() };
                        match read_input(Some(file)) {
                            Ok(text) => batches.push((src.to_string(), text)),
                            Err(e) => warn!("{src}: {e}"),
                        }
                    }
                }
            }
            ctx.tles.insert_all(&batches).await?;
            ctx.auto_sync().await
        }
        Some(("fetch", m)) => {
            let files = arg_all(m, "FILE");
            fetch::fetch_celestrak(&ctx.ws, &ctx.tles, files.as_deref()).await?;
            ctx.auto_sync().await
        }
        Some(("fetch-st", m)) => {
            let req = ctx
                .sats
                .parse_selector(arg_str(m, "SELECTOR"), &tle_overrides(), &Source::Tle)
                .await?;
            fetch::fetch_spacetrack(&ctx.ws, &ctx.tles, req.selector, &req.value).await?;
            ctx.auto_sync().await
        }
        Some(("find", m)) => {
            for tle in ctx.tles.find(arg_str(m, "TEXT")).await? {
                println!("{}\n{}\n", tle.name, tle.data);
            }
            Ok(())
        }
        Some(("history", m)) => {
            let last = m.get_one::<usize>("last").copied();
            for selector in arg_all(m, "SELECTOR").unwrap_or_default() {
                let req = ctx
                    .sats
                    .parse_selector(&selector, &tle_overrides(), &Source::Tle)
                    .await?;
                let (start, stop) = match req.limit {
                    Limit::After(date) => (Some(date), None),
                    Limit::Before(date) => (None, Some(date)),
                    Limit::Any => (None, None),
                };
                for tle in ctx
                    .tles
                    .history(req.selector, &req.value, last, start, stop)
                    .await?
                {
                    println!(
                        "{}  {}\n{}\n",
                        tle.epoch.format("%Y-%m-%dT%H:%M:%S"),
                        tle.name,
                        tle.data
                    );
                }
            }
            Ok(())
        }
        Some(("dump", m)) => {
            for tle in ctx.tles.dump(m.get_flag("all")).await? {
                println!("0 {}\n{}", tle.name, tle.data);
            }
            Ok(())
        }
        Some(("stats", _)) => {
            let stats = ctx.tles.stats().await?;
            println!("objects       {}", stats.objects);
            println!("records       {}", stats.records);
            if let Some(first) = stats.first_insert {
                println!("first insert  {}", first.format("%Y-%m-%dT%H:%M:%S"));
            }
            if let Some(last) = stats.last_insert {
                println!("last insert   {}", last.format("%Y-%m-%dT%H:%M:%S"));
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

async fn resolve_archived(ctx: &Ctx, kind: OrbitKind, selector: &str) -> Result<Sat> {
    ctx.resolver()
        .from_selector(selector, &kind_overrides(kind), &Source::Tle, true)
        .await
}

fn cospar_of(sat: &Sat) -> Result<&str> {
    sat.cospar_id().ok_or_else(|| Error::NotFound {
        field: "cospar_id".to_string(),
        value: sat.name().to_string(),
    })
}

async fn run_orbit(ctx: &Ctx, kind: OrbitKind, matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("get", m)) => {
            let sat = resolve_archived(ctx, kind, arg_str(m, "SELECTOR")).await?;
            if let Some(orb) = &sat.orb {
                print_orb(orb, ctx.originator());
            }
            Ok(())
        }
        Some(("insert", m)) => {
            let text = read_input(m.get_one::<String>("FILE").map(String::as_str))?;
            ctx.resolver()
                .insert_orbits(&text, kind, ctx.originator(), m.get_flag("force"))
                .await?;
            Ok(())
        }
        Some(("list", m)) => {
            let sat = ctx
                .resolver()
                .from_selector(arg_str(m, "SELECTOR"), &kind_overrides(kind), &Source::Tle, false)
                .await?;
            let cospar = cospar_of(&sat)?;
            let rtags = ctx.archive.rtags(cospar, Some(kind))?;
            let files = ctx.archive.files(cospar, kind, true)?;
            let last = m.get_one::<usize>("last").copied().unwrap_or(files.len());
            for (idx, path) in files.iter().take(last).enumerate() {
                let stamp = Archive::file_timestamp(path)?;
                let tag = rtags
                    .get(path)
                    .map(|tag| format!("  [{tag}]"))
                    .unwrap_or_default();
                let name = path
                    .file_name()
                    .and_then(|f| f.to_str())
                    .unwrap_or_default();
                // Mark the file the selector's offset points at.
                let marker = if idx == sat.req.offset { '*' } else { ' ' };
                println!(
                    "{marker} {idx:<3} {} {name}{tag}",
                    stamp.format("%Y-%m-%dT%H:%M:%S")
                );
            }
            Ok(())
        }
        Some(("compute", m)) => run_compute(ctx, kind, m).await,
        Some(("tag", m)) => {
            let sat = resolve_archived(ctx, kind, arg_str(m, "SELECTOR")).await?;
            let Some(Orb::Ccsds(orbit)) = &sat.orb else {
                return Err(Error::NoData {
                    request: sat.req.to_string(),
                });
            };
            let path = orbit.filepath().ok_or_else(|| Error::NoData {
                request: sat.req.to_string(),
            })?;
            ctx.archive
                .tag(cospar_of(&sat)?, path, arg_str(m, "TAG"), m.get_flag("force"))
        }
        Some(("tags", m)) => {
            let sat = ctx
                .resolver()
                .from_selector(arg_str(m, "SELECTOR"), &kind_overrides(kind), &Source::Tle, false)
                .await?;
            for (tag, path) in ctx.archive.tags(cospar_of(&sat)?, Some(kind))? {
                let name = path
                    .file_name()
                    .and_then(|f| f.to_str())
                    .unwrap_or_default();
                println!("{tag:<16} {name}");
            }
            Ok(())
        }
        Some(("purge", m)) => {
            let sat = ctx
                .resolver()
                .from_selector(arg_str(m, "SELECTOR"), &kind_overrides(kind), &Source::Tle, false)
                .await?;
            let cospar = cospar_of(&sat)?;

            let when = arg_str(m, "until");
            let until = match request::parse_date(when) {
                Ok(date) => date,
                Err(_) => Utc::now().naive_utc() - request::parse_timedelta(when)?,
            };

            let candidates = ctx.archive.purge_candidates(cospar, kind, until)?;
            if candidates.is_empty() {
                println!("nothing to purge");
                return Ok(());
            }
            if !m.get_flag("yes") {
                for path in &candidates {
                    println!("{}", path.display());
                }
                println!(
                    "{} file(s) older than {}; re-run with --yes to delete them",
                    candidates.len(),
                    until.format("%Y-%m-%dT%H:%M:%S"),
                );
                return Ok(());
            }
            let deleted = ctx.archive.purge(cospar, &candidates)?;
            println!("{deleted} file(s) deleted");
            Ok(())
        }
        _ => Ok(()),
    }
}

async fn run_compute(ctx: &Ctx, kind: OrbitKind, m: &ArgMatches) -> Result<()> {
    let sat = ctx
        .resolver()
        .from_selector(arg_str(m, "SELECTOR"), &tle_overrides(), &Source::Tle, true)
        .await?;
    let Some(Orb::Tle(tle)) = &sat.orb else {
        return Err(Error::NoData {
            request: sat.req.to_string(),
        });
    };

    let date = match m.get_one::<String>("date") {
        Some(text) => request::parse_date(text)?,
        None => Utc::now().naive_utc(),
    };

    let orbit = match kind {
        OrbitKind::Opm => {
            let (position, velocity) = tle.propagate(date)?;
            OrbitData::State(StateVector {
                name: sat.name().to_string(),
                cospar_id: tle.cospar_id.clone(),
                frame: "TEME".to_string(),
                epoch: date,
                position,
                velocity,
                propagator: Some(Propagator {
                    name: "SGP4".to_string(),
                    step_seconds: None,
                    method: None,
                }),
                filepath: None,
            })
        }
        OrbitKind::Oem => {
            let range = request::parse_timedelta(
                m.get_one::<String>("range").map(String::as_str).unwrap_or("1d"),
            )?;
            let step = request::parse_timedelta(
                m.get_one::<String>("step").map(String::as_str).unwrap_or("3m"),
            )?;
            let stop = date + range;
            let points = tle
                .ephemeris(date, stop, step)?
                .into_iter()
                .map(|(date, position, velocity)| EphemPoint {
                    date,
                    position,
                    velocity,
                })
                .collect();
            OrbitData::Ephem(Ephemeris {
                name: sat.name().to_string(),
                cospar_id: tle.cospar_id.clone(),
                frame: "TEME".to_string(),
                start: date,
                stop,
                interpolation: "LAGRANGE".to_string(),
                degree: Some(7),
                points,
                filepath: None,
            })
        }
    };

    if m.get_flag("insert") {
        ctx.archive
            .insert(&orbit, ctx.originator(), m.get_flag("force"))?;
    } else {
        print!("{}", ccsds::dumps(&orbit, ctx.originator()));
    }
    Ok(())
}

async fn run(matches: &ArgMatches) -> anyhow::Result<()> {
    let ctx = Ctx::open(matches).await?;
    match matches.subcommand() {
        Some(("sat", m)) => run_sat(&ctx, m).await?,
        Some(("tle", m)) => run_tle(&ctx, m).await?,
        Some(("oem", m)) => run_orbit(&ctx, OrbitKind::Oem, m).await?,
        Some(("opm", m)) => run_orbit(&ctx, OrbitKind::Opm, m).await?,
        _ => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let matches = cli().get_matches();
    if let Err(e) = run(&matches).await {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
