//! Declarative descriptions of the raster products used for burned-area training.
//!
//! A descriptor says how to find a product's files (glob), how to pull the
//! acquisition date and band out of a filename (regex with `date` / `band`
//! groups), which bands it carries and whether it feeds the image or the mask.

use crate::types::{SamplerError, SamplerResult, SourceRole};
use chrono::{Months, NaiveDate, TimeZone, Utc};
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceDescriptor {
    pub name: &'static str,
    pub filename_glob: &'static str,
    pub filename_regex: &'static str,
    pub date_format: Option<&'static str>,
    pub bands: &'static [&'static str],
    /// One file per band, siblings found by swapping the `band` group
    pub separate_band_files: bool,
    pub role: SourceRole,
    /// Class name to raster value, for categorical products
    pub classes: &'static [(&'static str, i32)],
}

/// What a filename told us
#[derive(Debug, Clone, PartialEq)]
pub struct FilenameMatch {
    pub time: (f64, f64),
    /// Byte range and text of the `band` group
    pub band: Option<(std::ops::Range<usize>, String)>,
}

pub const LANDCOVER_SIMPLE_CLASSES: &[(&str, i32)] = &[
    ("invalid", 0),
    ("deciduous forests", 1),
    ("coniferous forests", 2),
    ("swamp forests", 3),
    ("meadows", 4),
    ("agriculture", 5),
    ("bogs and mires", 6),
    ("clearings and cuttings", 7),
    ("water", 8),
    ("urban", 9),
];

pub const LANDCOVER_COMPLEX_CLASSES: &[(&str, i32)] = &[
    ("pine, birch, wide leafed coniferous forests", 1),
    ("spruce forests", 2),
    ("oak, deciduous forests, small leaved deciduous forests", 3),
    ("alder forests", 4),
    ("birch forests", 5),
    ("deciduous indigenous swamp forests", 6),
    ("meadows", 7),
    ("agriculture (fields and hay pasture)", 8),
    ("raised bog", 9),
    ("fen and transitional mire", 10),
    ("forest cuttings and clearings, cleared ground outside of urban areas", 11),
    ("water", 12),
    ("urban, cleared ground in urban areas, buildings, and tarmac", 13),
];

const ERA5_DATE_FORMAT: Option<&str> = Some("%Y%m");

pub static REGISTRY: &[SourceDescriptor] = &[
    SourceDescriptor {
        name: "modis_jd",
        filename_glob: "*JD.tif",
        filename_regex: r"^(?P<date>\d{6})\S{33}(?P<tile_number>\d).*",
        date_format: Some("%Y%m"),
        bands: &["Julian Day"],
        separate_band_files: false,
        role: SourceRole::Mask,
        classes: &[],
    },
    SourceDescriptor {
        name: "landcover_simple",
        filename_glob: "*Simple.tif",
        filename_regex: r".*",
        date_format: None,
        bands: &["class"],
        separate_band_files: false,
        role: SourceRole::Image,
        classes: LANDCOVER_SIMPLE_CLASSES,
    },
    SourceDescriptor {
        name: "landcover_complex",
        filename_glob: "*Complex.tif",
        filename_regex: r".*",
        date_format: None,
        bands: &["class"],
        separate_band_files: false,
        role: SourceRole::Image,
        classes: LANDCOVER_COMPLEX_CLASSES,
    },
    SourceDescriptor {
        name: "era5_snowc",
        filename_glob: "era5_snowc_*.tiff",
        filename_regex: r"^\S{11}(?P<date>\d{6})\S{7}",
        date_format: ERA5_DATE_FORMAT,
        bands: &["snowc"],
        separate_band_files: false,
        role: SourceRole::Image,
        classes: &[],
    },
    SourceDescriptor {
        name: "era5_sd",
        filename_glob: "era5_sd_*.tiff",
        filename_regex: r"^\S{8}(?P<date>\d{6})\S{7}",
        date_format: ERA5_DATE_FORMAT,
        bands: &["sd"],
        separate_band_files: false,
        role: SourceRole::Image,
        classes: &[],
    },
    SourceDescriptor {
        name: "era5_t2m",
        filename_glob: "era5_t2m_*.tiff",
        filename_regex: r"^\S{9}(?P<date>\d{6})\S{7}",
        date_format: ERA5_DATE_FORMAT,
        bands: &["t2m"],
        separate_band_files: false,
        role: SourceRole::Image,
        classes: &[],
    },
    SourceDescriptor {
        name: "era5_swvl1",
        filename_glob: "era5_swvl1_*.tiff",
        filename_regex: r"^\S{11}(?P<date>\d{6})\S{7}",
        date_format: ERA5_DATE_FORMAT,
        bands: &["swvl1"],
        separate_band_files: false,
        role: SourceRole::Image,
        classes: &[],
    },
    SourceDescriptor {
        name: "sentinel2",
        filename_glob: "*B03.tif",
        filename_regex: r"^(?P<date>\d{6})\S{4}(?P<band>B[018][\dA])\.tif$",
        date_format: Some("%Y%m"),
        bands: &["B03", "B08", "B11"],
        separate_band_files: true,
        role: SourceRole::Image,
        classes: &[],
    },
    SourceDescriptor {
        name: "landsat7",
        filename_glob: "LE07_*B3.TIF",
        filename_regex: concat!(
            r"^L(?P<sensor>[COTEM])(?P<satellite>\d{2})",
            r"_(?P<correction>[A-Z0-9]{4})",
            r"_(?P<wrs_path>\d{3})(?P<wrs_row>\d{3})",
            r"_(?P<date>\d{8})_(?P<processing_date>\d{8})",
            r"_(?P<collection>\d{2})_(?P<category>[A-Z0-9]{2})",
            r"_(?P<band>[A-Z0-9_]+)\."
        ),
        date_format: Some("%Y%m%d"),
        bands: &["B1", "B2", "B3", "B4", "B5", "B6", "B7", "B8"],
        separate_band_files: true,
        role: SourceRole::Image,
        classes: &[],
    },
];

/// Look up a registered product by name
pub fn descriptor(name: &str) -> SamplerResult<&'static SourceDescriptor> {
    REGISTRY
        .iter()
        .find(|d| d.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| {
            let known: Vec<&str> = REGISTRY.iter().map(|d| d.name).collect();
            SamplerError::Configuration(format!(
                "unknown source '{}', expected one of {:?}",
                name, known
            ))
        })
}

impl SourceDescriptor {
    pub fn compile_regex(&self) -> SamplerResult<Regex> {
        Regex::new(self.filename_regex).map_err(|e| {
            SamplerError::Configuration(format!("bad filename regex for {}: {}", self.name, e))
        })
    }

    /// Parse a bare filename; `None` when the name does not belong to this product
    pub fn parse_filename(
        &self,
        regex: &Regex,
        file_name: &str,
    ) -> SamplerResult<Option<FilenameMatch>> {
        let Some(caps) = regex.captures(file_name) else {
            return Ok(None);
        };

        let time = match (caps.name("date"), self.date_format) {
            (Some(date), Some(format)) => date_interval(date.as_str(), format)?,
            _ => (0.0, f64::MAX),
        };
        let band = caps
            .name("band")
            .map(|m| (m.range(), m.as_str().to_string()));

        Ok(Some(FilenameMatch { time, band }))
    }

    /// Class values in ascending order
    pub fn class_values(&self) -> Vec<i32> {
        let mut values: Vec<i32> = self.classes.iter().map(|(_, v)| *v).collect();
        values.sort_unstable();
        values
    }
}

enum Granularity {
    Year,
    Month,
    Day,
}

/// Time interval covered by a date string, as epoch seconds.
///
/// The interval spans the finest unit present in the format (year, month or
/// day) and ends one microsecond before the next one starts.
pub fn date_interval(text: &str, format: &str) -> SamplerResult<(f64, f64)> {
    let has_month = format.contains("%m");
    let has_day = format.contains("%d") || format.contains("%j");

    let (padded, full_format, granularity) = match (has_month, has_day) {
        (_, true) => (text.to_string(), format.to_string(), Granularity::Day),
        (true, false) => (format!("{}01", text), format!("{}%d", format), Granularity::Month),
        (false, false) => (format!("{}0101", text), format!("{}%m%d", format), Granularity::Year),
    };

    let start = NaiveDate::parse_from_str(&padded, &full_format).map_err(|e| {
        SamplerError::InvalidFormat(format!(
            "cannot parse date '{}' with format '{}': {}",
            text, format, e
        ))
    })?;

    let end = match granularity {
        Granularity::Day => start.succ_opt(),
        Granularity::Month => start.checked_add_months(Months::new(1)),
        Granularity::Year => start.checked_add_months(Months::new(12)),
    }
    .ok_or_else(|| SamplerError::InvalidFormat(format!("date '{}' is out of range", text)))?;

    let to_seconds = |date: NaiveDate| -> SamplerResult<f64> {
        let midnight = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| SamplerError::InvalidFormat(format!("invalid date {}", date)))?;
        Ok(Utc.from_utc_datetime(&midnight).timestamp() as f64)
    };

    Ok((to_seconds(start)?, to_seconds(end)? - 1e-6))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_month_interval() {
        let (start, end) = date_interval("202002", "%Y%m").unwrap();
        // 2020-02-01T00:00:00Z
        assert_eq!(start, 1_580_515_200.0);
        // leap year: 29 days
        assert!((end - (start + 29.0 * 86_400.0)).abs() < 1e-3);
    }

    #[test]
    fn test_day_and_year_intervals() {
        let (start, end) = date_interval("20200103", "%Y%m%d").unwrap();
        assert!((end - start - 86_400.0).abs() < 1e-3);

        let (start, end) = date_interval("2019", "%Y").unwrap();
        assert!((end - start - 365.0 * 86_400.0).abs() < 1e-3);
    }

    #[test]
    fn test_bad_date_is_invalid_format() {
        assert!(matches!(
            date_interval("2020ab", "%Y%m"),
            Err(SamplerError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_registry_lookup() {
        assert_eq!(descriptor("MODIS_JD").unwrap().role, SourceRole::Mask);
        assert!(matches!(descriptor("nope"), Err(SamplerError::Configuration(_))));
        for d in REGISTRY {
            assert!(d.compile_regex().is_ok(), "{} regex", d.name);
        }
    }

    #[test]
    fn test_sentinel_filename_band_group() {
        let d = descriptor("sentinel2").unwrap();
        let re = d.compile_regex().unwrap();
        let m = d.parse_filename(&re, "202007_S2_B03.tif").unwrap().unwrap();
        let (range, band) = m.band.unwrap();
        assert_eq!(band, "B03");
        assert_eq!(&"202007_S2_B03.tif"[range], "B03");
        assert!(d.parse_filename(&re, "readme.txt").unwrap().is_none());
    }

    #[test]
    fn test_landsat_filename() {
        let d = descriptor("landsat7").unwrap();
        let re = d.compile_regex().unwrap();
        let name = "LE07_L1TP_186024_20190712_20190807_01_T1_B3.TIF";
        let m = d.parse_filename(&re, name).unwrap().unwrap();
        assert_eq!(m.band.unwrap().1, "B3");
        let (start, _) = date_interval("20190712", "%Y%m%d").unwrap();
        assert_eq!(m.time.0, start);
    }

    #[test]
    fn test_landcover_class_values_sorted() {
        let d = descriptor("landcover_simple").unwrap();
        assert_eq!(d.class_values(), (0..10).collect::<Vec<_>>());
    }
}
