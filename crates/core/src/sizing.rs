use thiserror::Error;

use crate::domain::calculation::{MetricValue, ParamValue, ParameterSet, SizingResult};
use crate::domain::service::FlowKind;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SizingError {
    #[error("{flow} sizing is missing parameter `{name}`")]
    MissingParameter { flow: FlowKind, name: &'static str },
    #[error("{flow} parameter `{name}` has the wrong type")]
    WrongType { flow: FlowKind, name: &'static str },
}

/// Closed-form sizing for a completed parameter set.
pub trait FormulaService: Send + Sync {
    fn compute(&self, flow: FlowKind, params: &ParameterSet) -> Result<SizingResult, SizingError>;
}

#[derive(Clone, Debug, Default)]
pub struct StandardFormulas;

impl FormulaService for StandardFormulas {
    fn compute(&self, flow: FlowKind, params: &ParameterSet) -> Result<SizingResult, SizingError> {
        let params = Params { flow, values: params };
        match flow {
            FlowKind::Kafka => kafka(&params),
            FlowKind::Kubernetes => kubernetes(&params),
            FlowKind::Redis => redis(&params),
            FlowKind::RabbitMq => rabbitmq(&params),
        }
    }
}

struct Params<'a> {
    flow: FlowKind,
    values: &'a ParameterSet,
}

impl Params<'_> {
    fn number(&self, name: &'static str) -> Result<f64, SizingError> {
        let value = self
            .values
            .get(name)
            .ok_or(SizingError::MissingParameter { flow: self.flow, name })?;
        value.as_f64().ok_or(SizingError::WrongType { flow: self.flow, name })
    }

    fn flag(&self, name: &'static str) -> Result<bool, SizingError> {
        match self.values.get(name) {
            Some(ParamValue::Boolean(value)) => Ok(*value),
            Some(_) => Err(SizingError::WrongType { flow: self.flow, name }),
            None => Err(SizingError::MissingParameter { flow: self.flow, name }),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn float(value: f64) -> MetricValue {
    MetricValue::Float(round2(value))
}

fn int(value: i64) -> MetricValue {
    MetricValue::Integer(value)
}

fn kafka(params: &Params<'_>) -> Result<SizingResult, SizingError> {
    let messages_per_sec = params.number("messages_per_sec")?;
    let message_size_kb = params.number("message_size_kb")?;
    let retention_hours = params.number("retention_hours")?;
    let replication_factor = params.number("replication_factor")? as i64;

    let throughput_mb_sec = messages_per_sec * message_size_kb / 1024.0;
    let storage_needed_gb =
        throughput_mb_sec * 3600.0 * retention_hours / 1024.0 * replication_factor as f64;
    let brokers_count = replication_factor.max(3);
    let ram_per_broker_gb = 8_i64.max((storage_needed_gb / brokers_count as f64 / 10.0) as i64);
    let cpu_per_broker = 4_i64.max((messages_per_sec / 5000.0) as i64);

    Ok(SizingResult::new()
        .with("throughput_mb_sec", float(throughput_mb_sec))
        .with("storage_needed_gb", float(storage_needed_gb))
        .with("brokers_count", int(brokers_count))
        .with("ram_per_broker_gb", int(ram_per_broker_gb))
        .with("cpu_per_broker", int(cpu_per_broker))
        .with("storage_per_broker_gb", float(storage_needed_gb / brokers_count as f64 * 1.2)))
}

const K8S_SYSTEM_OVERHEAD: f64 = 1.2;
const K8S_NODE_CPU: f64 = 8.0;
const K8S_NODE_RAM_GB: f64 = 32.0;

fn kubernetes(params: &Params<'_>) -> Result<SizingResult, SizingError> {
    let pods_count = params.number("pods_count")?;
    let avg_cpu_per_pod = params.number("avg_cpu_per_pod")?;
    let avg_ram_per_pod_gb = params.number("avg_ram_per_pod_gb")?;
    let high_availability = params.flag("high_availability")?;

    let total_cpu = pods_count * avg_cpu_per_pod * K8S_SYSTEM_OVERHEAD;
    let total_ram_gb = pods_count * avg_ram_per_pod_gb * K8S_SYSTEM_OVERHEAD;

    let min_nodes: i64 = if high_availability { 3 } else { 1 };
    let nodes_by_cpu = min_nodes.max((total_cpu / K8S_NODE_CPU) as i64 + 1);
    let nodes_by_ram = min_nodes.max((total_ram_gb / K8S_NODE_RAM_GB) as i64 + 1);
    let worker_nodes = nodes_by_cpu.max(nodes_by_ram);
    let control_plane_nodes = if high_availability { 3 } else { 1 };

    Ok(SizingResult::new()
        .with("total_cpu_required", float(total_cpu))
        .with("total_ram_gb_required", float(total_ram_gb))
        .with("worker_nodes_count", int(worker_nodes))
        .with("control_plane_nodes", int(control_plane_nodes))
        .with(
            "recommended_node_size",
            MetricValue::Text(format!("{K8S_NODE_CPU} vCPU, {K8S_NODE_RAM_GB} GB RAM")),
        )
        .with("total_nodes", int(worker_nodes + control_plane_nodes)))
}

const REDIS_MAX_RAM_PER_INSTANCE_GB: f64 = 64.0;

fn redis(params: &Params<'_>) -> Result<SizingResult, SizingError> {
    let dataset_size_gb = params.number("dataset_size_gb")?;
    let operations_per_sec = params.number("operations_per_sec")?;
    let high_availability = params.flag("high_availability")?;
    let persistence = params.flag("persistence")?;

    let memory_overhead = if persistence { 1.5 } else { 1.3 };
    let total_memory_gb = dataset_size_gb * memory_overhead;
    let masters = 1_i64.max((total_memory_gb / REDIS_MAX_RAM_PER_INSTANCE_GB) as i64 + 1);
    let (total_instances, replicas) =
        if high_availability { (masters * 2, masters) } else { (masters, 0) };
    let cpu_per_instance = 4_i64.max((operations_per_sec / 50_000.0) as i64);
    let ram_per_instance_gb = total_memory_gb / masters as f64;
    let disk_per_instance_gb = if persistence { ram_per_instance_gb * 1.5 } else { 0.0 };

    Ok(SizingResult::new()
        .with("total_memory_gb", float(total_memory_gb))
        .with("master_instances", int(masters))
        .with("replica_instances", int(replicas))
        .with("total_instances", int(total_instances))
        .with("ram_per_instance_gb", float(ram_per_instance_gb))
        .with("cpu_per_instance", int(cpu_per_instance))
        .with("disk_per_instance_gb", float(disk_per_instance_gb)))
}

const RABBITMQ_OVERHEAD: f64 = 2.0;

fn rabbitmq(params: &Params<'_>) -> Result<SizingResult, SizingError> {
    let messages_per_sec = params.number("messages_per_sec")?;
    let message_size_kb = params.number("message_size_kb")?;
    let queue_depth = params.number("queue_depth")?;
    let high_availability = params.flag("high_availability")?;

    let queue_memory_gb = queue_depth * message_size_kb / (1024.0 * 1024.0);
    let total_memory_gb = queue_memory_gb * RABBITMQ_OVERHEAD;
    let nodes_count: i64 = if high_availability { 3 } else { 1 };
    let ram_per_node_gb = 8_i64.max((total_memory_gb / nodes_count as f64) as i64);
    let cpu_per_node = 4_i64.max((messages_per_sec / 10_000.0) as i64);

    Ok(SizingResult::new()
        .with("nodes_count", int(nodes_count))
        .with("ram_per_node_gb", int(ram_per_node_gb))
        .with("cpu_per_node", int(cpu_per_node))
        .with("disk_per_node_gb", int(ram_per_node_gb * 2))
        .with("throughput_mb_sec", float(messages_per_sec * message_size_kb / 1024.0))
        .with("total_memory_gb", float(total_memory_gb))
        .with("queue_memory_gb", float(queue_memory_gb)))
}

#[cfg(test)]
mod tests {
    use super::{FormulaService, SizingError, StandardFormulas};
    use crate::domain::calculation::{MetricValue, ParamValue, ParameterSet};
    use crate::domain::service::FlowKind;

    fn params(values: &[(&str, ParamValue)]) -> ParameterSet {
        values.iter().map(|(name, value)| ((*name).to_owned(), value.clone())).collect()
    }

    #[test]
    fn kafka_sizing_matches_reference_numbers() {
        let result = StandardFormulas
            .compute(
                FlowKind::Kafka,
                &params(&[
                    ("messages_per_sec", ParamValue::Integer(10_000)),
                    ("message_size_kb", ParamValue::Float(1.0)),
                    ("retention_hours", ParamValue::Integer(24)),
                    ("replication_factor", ParamValue::Integer(3)),
                ]),
            )
            .expect("kafka sizing");

        assert_eq!(result.get("throughput_mb_sec"), Some(&MetricValue::Float(9.77)));
        assert_eq!(result.get("storage_needed_gb"), Some(&MetricValue::Float(2471.92)));
        assert_eq!(result.get("brokers_count"), Some(&MetricValue::Integer(3)));
        assert_eq!(result.get("ram_per_broker_gb"), Some(&MetricValue::Integer(82)));
        assert_eq!(result.get("cpu_per_broker"), Some(&MetricValue::Integer(4)));
        assert_eq!(result.len(), 6);
    }

    #[test]
    fn kubernetes_reports_node_size_as_text() {
        let result = StandardFormulas
            .compute(
                FlowKind::Kubernetes,
                &params(&[
                    ("pods_count", ParamValue::Integer(100)),
                    ("avg_cpu_per_pod", ParamValue::Float(0.5)),
                    ("avg_ram_per_pod_gb", ParamValue::Float(1.0)),
                    ("high_availability", ParamValue::Boolean(true)),
                ]),
            )
            .expect("kubernetes sizing");

        assert_eq!(result.get("worker_nodes_count"), Some(&MetricValue::Integer(8)));
        assert_eq!(result.get("control_plane_nodes"), Some(&MetricValue::Integer(3)));
        assert_eq!(result.get("total_nodes"), Some(&MetricValue::Integer(11)));
        assert_eq!(
            result.get("recommended_node_size"),
            Some(&MetricValue::Text("8 vCPU, 32 GB RAM".to_owned()))
        );
    }

    #[test]
    fn redis_high_availability_doubles_instances() {
        let result = StandardFormulas
            .compute(
                FlowKind::Redis,
                &params(&[
                    ("dataset_size_gb", ParamValue::Float(100.0)),
                    ("operations_per_sec", ParamValue::Integer(200_000)),
                    ("high_availability", ParamValue::Boolean(true)),
                    ("persistence", ParamValue::Boolean(false)),
                ]),
            )
            .expect("redis sizing");

        assert_eq!(result.get("master_instances"), Some(&MetricValue::Integer(3)));
        assert_eq!(result.get("replica_instances"), Some(&MetricValue::Integer(3)));
        assert_eq!(result.get("total_instances"), Some(&MetricValue::Integer(6)));
        assert_eq!(result.get("cpu_per_instance"), Some(&MetricValue::Integer(4)));
        assert_eq!(result.get("disk_per_instance_gb"), Some(&MetricValue::Float(0.0)));
    }

    #[test]
    fn rabbitmq_single_node_without_high_availability() {
        let result = StandardFormulas
            .compute(
                FlowKind::RabbitMq,
                &params(&[
                    ("messages_per_sec", ParamValue::Integer(50_000)),
                    ("message_size_kb", ParamValue::Float(10.0)),
                    ("queue_depth", ParamValue::Integer(1_000_000)),
                    ("high_availability", ParamValue::Boolean(false)),
                ]),
            )
            .expect("rabbitmq sizing");

        assert_eq!(result.get("nodes_count"), Some(&MetricValue::Integer(1)));
        assert_eq!(result.get("ram_per_node_gb"), Some(&MetricValue::Integer(19)));
        assert_eq!(result.get("disk_per_node_gb"), Some(&MetricValue::Integer(38)));
        assert_eq!(result.get("cpu_per_node"), Some(&MetricValue::Integer(5)));
    }

    #[test]
    fn missing_parameters_are_reported() {
        let error = StandardFormulas
            .compute(FlowKind::Redis, &params(&[("dataset_size_gb", ParamValue::Float(1.0))]))
            .expect_err("incomplete parameters");
        assert_eq!(
            error,
            SizingError::MissingParameter { flow: FlowKind::Redis, name: "operations_per_sec" }
        );
    }
}
