#![allow(dead_code)]

use space_command::archive::Archive;
use space_command::sat::SatStore;
use space_command::tle::TleStore;
use space_command::wspace::Workspace;
use tempfile::TempDir;

pub const ISS_2016: &str = "ISS (ZARYA)
1 25544U 98067A   16343.27310274  .00004170  00000-0  70208-4 0  9996
2 25544  51.6420 245.4915 0003135 211.8338 242.8677 15.54121086 88980";

pub const ISS_2017: &str = "ISS (ZARYA)
1 25544U 98067A   17343.27310274  .00004170  00000-0  70208-4 0  9997
2 25544  51.6420 245.4915 0003135 211.8338 242.8677 15.54121086 88980";

pub const ISS_2018: &str = "ISS (ZARYA)
1 25544U 98067A   18297.55162980  .00001655  00000-0  32532-4 0  9999
2 25544  51.6407  94.0557 0003791 332.0725 138.3982 15.53858634138630";

/// Three epochs of the same object: 2016-12-08, 2017-12-09, 2018-10-24.
pub fn iss_all() -> String {
    format!("{ISS_2016}\n{ISS_2017}\n{ISS_2018}")
}

pub struct Fixture {
    // Held so the directory survives as long as the workspace.
    _dir: TempDir,
    pub ws: Workspace,
}

impl Fixture {
    pub fn tles(&self) -> TleStore {
        TleStore::new(self.ws.db.clone())
    }

    pub fn sats(&self) -> SatStore {
        SatStore::new(self.ws.db.clone())
    }

    pub fn archive(&self) -> Archive {
        Archive::new(self.ws.satdb_dir())
    }
}

pub async fn workspace() -> Fixture {
    let dir = TempDir::new().unwrap();
    let ws = Workspace::open(dir.path()).await.unwrap();
    Fixture { _dir: dir, ws }
}
