use super::{json_pretty, lab_err, Context, EXIT_SUCCESS};
use crate::ProviderFilter;
use labmachine_core::{list_images, list_locations, list_sizes, list_zones};

pub fn locations(ctx: &Context, code: &str, country: Option<&str>) -> Result<u8, String> {
    let mut locations = list_locations(&ctx.registry, &ctx.settings, code).map_err(lab_err)?;
    if let Some(country) = country {
        locations.retain(|l| l.country.eq_ignore_ascii_case(country));
    }
    if ctx.json {
        println!("{}", json_pretty(&locations)?);
    } else if locations.is_empty() {
        println!("no locations found");
    } else {
        println!("{:<28} COUNTRY", "NAME");
        for location in &locations {
            println!("{:<28} {}", location.name, location.country);
        }
    }
    Ok(EXIT_SUCCESS)
}

pub fn vm_types(ctx: &Context, code: &str, location: Option<&str>) -> Result<u8, String> {
    let sizes = list_sizes(&ctx.registry, &ctx.settings, code, location).map_err(lab_err)?;
    if ctx.json {
        println!("{}", json_pretty(&sizes)?);
    } else if sizes.is_empty() {
        println!("no machine types found");
    } else {
        println!("{:<24} {:>6} {:>8}", "NAME", "CPUS", "RAM_GB");
        for size in &sizes {
            println!("{:<24} {:>6} {:>8}", size.name, size.cpus, size.ram_gb());
        }
    }
    Ok(EXIT_SUCCESS)
}

pub fn images(ctx: &Context, code: &str) -> Result<u8, String> {
    let images = list_images(&ctx.registry, &ctx.settings, code).map_err(lab_err)?;
    if ctx.json {
        println!("{}", json_pretty(&images)?);
    } else if images.is_empty() {
        println!("no images found");
    } else {
        println!("{:<40} FAMILY", "NAME");
        for image in &images {
            println!("{:<40} {}", image.name, image.family.as_deref().unwrap_or(""));
        }
    }
    Ok(EXIT_SUCCESS)
}

pub fn dns(ctx: &Context, code: &str) -> Result<u8, String> {
    let zones = list_zones(&ctx.registry, &ctx.settings, code).map_err(lab_err)?;
    if ctx.json {
        println!("{}", json_pretty(&zones)?);
    } else if zones.is_empty() {
        println!("no DNS zones found");
    } else {
        println!("{:<24} {:<32} TYPE", "ID", "DOMAIN");
        for zone in &zones {
            println!("{:<24} {:<32} {}", zone.id, zone.domain, zone.zone_type);
        }
    }
    Ok(EXIT_SUCCESS)
}

pub fn providers(ctx: &Context, filter: ProviderFilter) -> Result<u8, String> {
    let compute = matches!(filter, ProviderFilter::Compute | ProviderFilter::All)
        .then(|| ctx.registry.compute_codes());
    let dns = matches!(filter, ProviderFilter::Dns | ProviderFilter::All)
        .then(|| ctx.registry.dns_codes());
    if ctx.json {
        let mut payload = serde_json::Map::new();
        if let Some(codes) = &compute {
            payload.insert("compute".to_owned(), serde_json::json!(codes));
        }
        if let Some(codes) = &dns {
            payload.insert("dns".to_owned(), serde_json::json!(codes));
        }
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("{:<10} CODE", "KIND");
        for code in compute.iter().flatten() {
            println!("{:<10} {code}", "compute");
        }
        for code in dns.iter().flatten() {
            println!("{:<10} {code}", "dns");
        }
    }
    Ok(EXIT_SUCCESS)
}
