use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use super::{ColumnDerivation, DataflowGraphInner, ValuesMap};
use crate::engine::graph::ColumnProperties;
use crate::engine::{
    ColumnHandle, ComplexColumn, Computer, Context as ContextTrait, Error, Key, Result,
    UniverseHandle, Value,
};

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct Request {
    column_index: usize,
    key: Key,
    args: Option<Arc<[Value]>>,
}

/// What `Context::get` can see for each input slot.
enum SlotInfo {
    Column(ValuesMap),
    Computer { takes_args: bool },
}

struct ComputerInfo {
    universe: UniverseHandle,
    external: bool,
    method: bool,
    data: Value,
    data_values: Option<ValuesMap>,
}

impl ComputerInfo {
    fn row_data(&self, key: Key) -> Value {
        match &self.data_values {
            Some(values) => values.get(&key).cloned().unwrap_or(Value::None),
            None => self.data.clone(),
        }
    }
}

struct ComputeContext<'a> {
    key: Key,
    data: Value,
    slots: &'a [SlotInfo],
    resolved: &'a HashMap<Request, Option<Value>>,
    pending: RefCell<Vec<Request>>,
}

impl<'a> ContextTrait for ComputeContext<'a> {
    fn this_row(&self) -> Key {
        self.key
    }

    fn data(&self) -> Value {
        self.data.clone()
    }

    fn get(&self, column_index: usize, row: Key, args: Vec<Value>) -> Option<Value> {
        match self.slots.get(column_index)? {
            SlotInfo::Column(values) => values.get(&row).cloned(),
            SlotInfo::Computer { takes_args } => {
                let args = if *takes_args {
                    Some(Arc::from(args))
                } else {
                    None
                };
                let request = Request {
                    column_index,
                    key: row,
                    args,
                };
                match self.resolved.get(&request) {
                    Some(value) => value.clone(),
                    None => {
                        // not computed yet; record the dependency and retry later
                        self.pending.borrow_mut().push(request);
                        None
                    }
                }
            }
        }
    }
}

fn computer_info(computer: &Computer, external: bool, graph: &DataflowGraphInner) -> Result<ComputerInfo> {
    match computer {
        Computer::Attribute {
            universe_handle, ..
        } => Ok(ComputerInfo {
            universe: *universe_handle,
            external,
            method: false,
            data: Value::None,
            data_values: None,
        }),
        Computer::Method {
            universe_handle,
            data,
            data_column_handle,
            ..
        } => Ok(ComputerInfo {
            universe: *universe_handle,
            external,
            method: true,
            data: data.clone(),
            data_values: match data_column_handle {
                Some(handle) => Some(graph.column_values(*handle)?),
                None => None,
            },
        }),
    }
}

/// Resolves a system of interdependent computed columns to a fixed point.
///
/// Attribute computers are evaluated for every row of their universe; method
/// computers are evaluated on demand, with the arguments other computers
/// request them with. A request whose dependencies are not ready yet is
/// requeued; a set of requests that stops making progress is a dependency
/// cycle and fails the build.
pub fn complex_columns(
    graph: &mut DataflowGraphInner,
    inputs: Vec<ComplexColumn>,
) -> Result<Vec<ColumnHandle>> {
    let mut slots = Vec::with_capacity(inputs.len());
    let mut computers: Vec<Option<ComputerInfo>> = Vec::with_capacity(inputs.len());
    let mut logics: Vec<Option<Computer>> = Vec::with_capacity(inputs.len());

    for input in inputs {
        let takes_args = input.takes_args();
        match input {
            ComplexColumn::Column(column_handle) => {
                slots.push(SlotInfo::Column(graph.column_values(column_handle)?));
                computers.push(None);
                logics.push(None);
            }
            ComplexColumn::InternalComputer(computer) => {
                slots.push(SlotInfo::Computer { takes_args });
                computers.push(Some(computer_info(&computer, false, graph)?));
                logics.push(Some(computer));
            }
            ComplexColumn::ExternalComputer(computer) => {
                slots.push(SlotInfo::Computer { takes_args });
                computers.push(Some(computer_info(&computer, true, graph)?));
                logics.push(Some(computer));
            }
        }
    }

    // every attribute computer is evaluated for every row of its universe
    let mut queue: VecDeque<Request> = VecDeque::new();
    let mut queued: HashSet<Request> = HashSet::new();
    for (column_index, info) in computers.iter().enumerate() {
        let Some(info) = info else { continue };
        if info.method {
            continue;
        }
        for key in graph.universe_keys(info.universe)?.iter() {
            let request = Request {
                column_index,
                key: *key,
                args: None,
            };
            queued.insert(request.clone());
            queue.push_back(request);
        }
    }

    let mut resolved: HashMap<Request, Option<Value>> = HashMap::new();
    let mut since_progress = 0usize;
    while let Some(request) = queue.pop_front() {
        if resolved.contains_key(&request) {
            continue;
        }
        let info = computers[request.column_index]
            .as_ref()
            .expect("requests only target computer slots");
        let context = ComputeContext {
            key: request.key,
            data: info.row_data(request.key),
            slots: &slots,
            resolved: &resolved,
            pending: RefCell::new(Vec::new()),
        };
        let logic = logics[request.column_index]
            .as_mut()
            .expect("requests only target computer slots");
        let args = request.args.as_deref().unwrap_or(&[]);
        let result = logic.compute(&context, args);
        let pending = context.pending.into_inner();
        if pending.is_empty() {
            resolved.insert(request, result.map_err(Error::from)?);
            since_progress = 0;
        } else {
            let mut enqueued_any = false;
            for dependency in pending {
                if !resolved.contains_key(&dependency) && queued.insert(dependency.clone()) {
                    queue.push_back(dependency);
                    enqueued_any = true;
                }
            }
            queue.push_back(request);
            if enqueued_any {
                since_progress = 0;
            } else {
                since_progress += 1;
                if since_progress > queue.len() {
                    return Err(Error::Dataflow(
                        "cyclic dependency between computed columns".to_string(),
                    ));
                }
            }
        }
    }

    // only external computers produce visible columns
    let mut output_handles = Vec::new();
    for (column_index, info) in computers.iter().enumerate() {
        let Some(info) = info else { continue };
        if !info.external {
            continue;
        }
        let keys = graph.universe_keys(info.universe)?;
        let mut data = HashMap::with_capacity(keys.len());
        if info.method {
            // method columns expose the data needed to call them later
            for key in keys.iter() {
                let value = Value::Tuple(
                    [info.row_data(*key), Value::Pointer(*key)].as_slice().into(),
                );
                data.insert(*key, value);
            }
        } else {
            for key in keys.iter() {
                let request = Request {
                    column_index,
                    key: *key,
                    args: None,
                };
                let value = resolved
                    .get(&request)
                    .cloned()
                    .flatten()
                    .unwrap_or(Value::None);
                data.insert(*key, value);
            }
        }
        let handle = graph.add_column(
            info.universe,
            ColumnDerivation::Static(Arc::new(data)),
            Arc::new(ColumnProperties::new()),
        )?;
        output_handles.push(handle);
    }

    Ok(output_handles)
}
