use uuid::Uuid;

use crate::types::{DeviceRuntime, DeviceType, PhysicalDevice};

use super::{Store, StoreError};

#[derive(sqlx::FromRow)]
struct DeviceRow {
    id: Uuid,
    agent_id: i64,
    device_index: i32,
    device_type: String,
    enabled: bool,
    selected_runtime: Option<String>,
    processors: Option<i32>,
    clock_mhz: Option<i32>,
    memory_mb: Option<i64>,
    pci_address: Option<String>,
}

impl From<DeviceRow> for PhysicalDevice {
    fn from(r: DeviceRow) -> Self {
        PhysicalDevice {
            id: r.id,
            agent_id: r.agent_id,
            device_index: r.device_index,
            device_type: match r.device_type.as_str() {
                "cpu" => DeviceType::Cpu,
                _ => DeviceType::Gpu,
            },
            enabled: r.enabled,
            selected_runtime: r.selected_runtime.as_deref().map(|s| match s {
                "hip" => DeviceRuntime::Hip,
                "opencl" => DeviceRuntime::OpenCl,
                _ => DeviceRuntime::Cuda,
            }),
            processors: r.processors,
            clock_mhz: r.clock_mhz,
            memory_mb: r.memory_mb,
            pci_address: r.pci_address,
        }
    }
}

impl Store {
    /// Replaces an agent's device inventory wholesale after detection,
    /// per §4.2. Auto-disable/re-enable on presence of an enabled device is
    /// enforced by the caller after this write.
    pub async fn replace_devices(&self, agent_id: i64, devices: &[PhysicalDevice]) -> Result<(), StoreError> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM physical_devices WHERE agent_id = $1")
            .bind(agent_id)
            .execute(&mut *tx)
            .await?;
        for d in devices {
            let device_type = match d.device_type {
                DeviceType::Gpu => "gpu",
                DeviceType::Cpu => "cpu",
            };
            let runtime = d.selected_runtime.map(|r| match r {
                DeviceRuntime::Cuda => "cuda",
                DeviceRuntime::Hip => "hip",
                DeviceRuntime::OpenCl => "opencl",
            });
            sqlx::query(
                "INSERT INTO physical_devices (agent_id, device_index, device_type, enabled, selected_runtime, processors, clock_mhz, memory_mb, pci_address) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(agent_id)
            .bind(d.device_index)
            .bind(device_type)
            .bind(d.enabled)
            .bind(runtime)
            .bind(d.processors)
            .bind(d.clock_mhz)
            .bind(d.memory_mb)
            .bind(&d.pci_address)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn list_devices(&self, agent_id: i64) -> Result<Vec<PhysicalDevice>, StoreError> {
        let rows: Vec<DeviceRow> = sqlx::query_as("SELECT * FROM physical_devices WHERE agent_id = $1 ORDER BY device_index")
            .bind(agent_id)
            .fetch_all(self.pool())
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn has_enabled_device(&self, agent_id: i64) -> Result<bool, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM physical_devices WHERE agent_id = $1 AND enabled = TRUE")
            .bind(agent_id)
            .fetch_one(self.pool())
            .await?;
        Ok(count > 0)
    }
}
