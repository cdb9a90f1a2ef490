//! Country lookup using a memory-mapped MaxMind Country or City database.
//!
//! The lookup runs on the raw address in memory; only the ISO country code
//! leaves this module.

use maxminddb::{geoip2, Mmap, Reader};
use std::net::IpAddr;
use std::sync::Arc;

use crate::error::{Error, Result};

#[derive(Clone, Default)]
pub struct GeoIpService {
    reader: Option<Arc<Reader<Mmap>>>,
}

impl GeoIpService {
    /// Open the database at `path`, or build a service that never resolves
    /// anything when no path is configured.
    pub fn new(path: Option<&str>) -> Result<Self> {
        let reader = match path {
            Some(path) => {
                let reader = unsafe { Reader::open_mmap(path) }.map_err(|e| {
                    Error::config(format!("failed to open GeoIP database at {path}: {e}"))
                })?;
                Some(Arc::new(reader))
            }
            None => None,
        };
        Ok(Self { reader })
    }

    pub fn is_enabled(&self) -> bool {
        self.reader.is_some()
    }

    /// Two-letter ISO country code for `ip`, if the database knows it.
    pub fn country_code(&self, ip: IpAddr) -> Option<String> {
        let reader = self.reader.as_ref()?;
        let result = reader.lookup(ip).ok()?;

        // City databases are a superset of Country, so the Country view
        // decodes from either.
        let country = result.decode::<geoip2::Country>().ok()??;
        country.country.iso_code.map(|code| code.to_string())
    }
}
