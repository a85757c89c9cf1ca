//! Service and characteristic resolution
//!
//! Scales from the same family expose the weight data under different GATT
//! identifiers. Each resolver walks its candidate list in priority order and
//! stops at the first identifier the device actually has.

use crate::domain::models::FailureKind;
use crate::infrastructure::bluetooth::platform::{BlePlatform, DeviceHandle, Discovery};
use tracing::{debug, info, trace};
use uuid::Uuid;

pub struct ServiceResolver<'a> {
    candidates: &'a [Uuid],
}

impl<'a> ServiceResolver<'a> {
    pub fn new(candidates: &'a [Uuid]) -> Self {
        Self { candidates }
    }

    pub async fn resolve<P: BlePlatform>(
        &self,
        platform: &P,
        device: &DeviceHandle,
    ) -> Result<(Uuid, P::Service), FailureKind> {
        for uuid in self.candidates {
            match platform.discover_service(device, *uuid).await {
                Ok(Discovery::Found(service)) => {
                    info!(%uuid, "Found scale service");
                    return Ok((*uuid, service));
                }
                Ok(Discovery::NotFound) => trace!(%uuid, "Service not present"),
                Err(e) => debug!(%uuid, error = %e, "Service lookup failed, trying next"),
            }
        }
        Err(FailureKind::NoCompatibleService)
    }
}

pub struct CharacteristicResolver<'a> {
    candidates: &'a [Uuid],
}

impl<'a> CharacteristicResolver<'a> {
    pub fn new(candidates: &'a [Uuid]) -> Self {
        Self { candidates }
    }

    pub async fn resolve<P: BlePlatform>(
        &self,
        platform: &P,
        service: &P::Service,
    ) -> Result<(Uuid, P::Characteristic), FailureKind> {
        for uuid in self.candidates {
            match platform.discover_characteristic(service, *uuid).await {
                Ok(Discovery::Found(characteristic)) => {
                    info!(%uuid, "Found measurement characteristic");
                    return Ok((*uuid, characteristic));
                }
                Ok(Discovery::NotFound) => trace!(%uuid, "Characteristic not present"),
                Err(e) => debug!(%uuid, error = %e, "Characteristic lookup failed, trying next"),
            }
        }
        Err(FailureKind::NoCompatibleCharacteristic)
    }
}
