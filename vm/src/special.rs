use object::{
    ClassDescriptor, ClassRef, InstanceSpec, MethodDescriptor, MethodHeader, ObjectBody,
    ObjectMemory, Value,
};

use crate::frame::FrameArena;
use crate::primitives::PrimitiveTable;
use crate::linked_list::linked_list_fields;
use crate::scheduler::{process_fields, scheduler_fields};
use crate::semaphore::semaphore_fields;
use crate::signals::SignalInbox;
use crate::{Diagnostics, Vm, VmError, VmSettings};

/// Classes the VM itself needs to know about.
#[derive(Debug, Clone, Copy)]
pub struct SpecialClasses {
    pub object: ClassRef,
    pub undefined_object: ClassRef,
    pub true_class: ClassRef,
    pub false_class: ClassRef,
    pub small_integer: ClassRef,
    pub character: ClassRef,
    pub symbol: ClassRef,
    pub array: ClassRef,
    pub linked_list: ClassRef,
    pub semaphore: ClassRef,
    pub process: ClassRef,
    pub process_scheduler: ClassRef,
    pub method_context: ClassRef,
    pub block_closure: ClassRef,
    pub compiled_method: ClassRef,
}

fn subclass(
    memory: &mut ObjectMemory,
    name: &str,
    superclass: ClassRef,
    spec: InstanceSpec,
    inst_size: usize,
) -> ClassRef {
    memory.add_class(ClassDescriptor::new(name, Some(superclass), spec, inst_size))
}

/// Build the minimal class graph, an empty process scheduler and the
/// primitive methods of the kernel classes.
pub fn bootstrap(settings: VmSettings) -> Result<Vm, VmError> {
    if settings.priority_levels == 0 {
        return Err(VmError::InvalidSettings("at least one priority level is required"));
    }
    let mut memory = ObjectMemory::new();
    let m = &mut memory;

    let object = m.add_class(ClassDescriptor::new("Object", None, InstanceSpec::Empty, 0));
    let symbol = m.symbol_class();
    m.class_mut(symbol).superclass = Some(object);

    let linked_list = subclass(m, "LinkedList", object, InstanceSpec::Fixed, linked_list_fields::INST_SIZE);
    let specials = SpecialClasses {
        object,
        undefined_object: subclass(m, "UndefinedObject", object, InstanceSpec::Empty, 0),
        true_class: subclass(m, "True", object, InstanceSpec::Empty, 0),
        false_class: subclass(m, "False", object, InstanceSpec::Empty, 0),
        small_integer: subclass(m, "SmallInteger", object, InstanceSpec::Empty, 0),
        character: subclass(m, "Character", object, InstanceSpec::Empty, 0),
        symbol,
        array: subclass(m, "Array", object, InstanceSpec::Variable, 0),
        linked_list,
        semaphore: subclass(m, "Semaphore", linked_list, InstanceSpec::Fixed, semaphore_fields::INST_SIZE),
        process: subclass(m, "Process", object, InstanceSpec::Fixed, process_fields::INST_SIZE),
        process_scheduler: subclass(
            m,
            "ProcessorScheduler",
            object,
            InstanceSpec::Fixed,
            scheduler_fields::INST_SIZE,
        ),
        method_context: subclass(m, "Context", object, InstanceSpec::Context, 0),
        block_closure: subclass(m, "BlockClosure", object, InstanceSpec::Closure, 0),
        compiled_method: subclass(m, "CompiledMethod", object, InstanceSpec::CompiledMethod, 0),
    };

    let lists = memory.instantiate(specials.array, settings.priority_levels)?;
    for i in 0..settings.priority_levels {
        let list = memory.instantiate(specials.linked_list, 0)?;
        memory.put(lists, i, Value::from_ref(list))?;
    }
    let scheduler = memory.instantiate(specials.process_scheduler, 0)?;
    memory.put(scheduler, scheduler_fields::PROCESS_LISTS, Value::from_ref(lists))?;

    let mut vm = Vm {
        memory,
        frames: FrameArena::with_capacity(settings.frame_capacity),
        specials,
        scheduler,
        primitives: PrimitiveTable::with_defaults(),
        signals: SignalInbox::new(),
        diagnostics: Diagnostics::default(),
        settings,
    };
    install_kernel_methods(&mut vm);
    log::debug!("bootstrapped kernel classes, {} priority levels", settings.priority_levels);
    Ok(vm)
}

fn install_kernel_methods(vm: &mut Vm) {
    let s = vm.specials;
    let kernel: &[(ClassRef, &str, u8, u16)] = &[
        (s.small_integer, "+", 1, 1),
        (s.small_integer, "-", 1, 2),
        (s.small_integer, "<", 1, 3),
        (s.small_integer, ">", 1, 4),
        (s.small_integer, "=", 1, 7),
        (s.small_integer, "*", 1, 9),
        (s.object, "at:", 1, 60),
        (s.object, "at:put:", 2, 61),
        (s.object, "size", 0, 62),
        (s.object, "identityHash", 0, 75),
        (s.object, "become:", 1, 128),
        (s.semaphore, "signal", 0, 85),
        (s.semaphore, "wait", 0, 86),
        (s.process, "resume", 0, 87),
        (s.process, "suspend", 0, 88),
        (s.process_scheduler, "yield", 0, 167),
        (s.method_context, "stackp:", 1, 76),
        (s.method_context, "findNextUnwindContextUpTo:", 1, 195),
        (s.method_context, "terminateTo:", 1, 196),
        (s.method_context, "at:", 1, 210),
        (s.method_context, "at:put:", 2, 211),
        (s.method_context, "size", 0, 212),
    ];
    for &(class, selector, num_args, primitive) in kernel {
        vm.install_primitive_method(class, selector, num_args, primitive);
    }
}

impl Vm {
    /// Allocate a compiled method object.
    pub fn new_method(
        &mut self,
        header: MethodHeader,
        literals: Vec<Value>,
        bytecode: Vec<u8>,
        selector: Value,
    ) -> Value {
        let mut method = MethodDescriptor::new(header, literals, bytecode);
        method.selector = selector;
        let class = self.specials.compiled_method;
        Value::from_ref(self.memory.allocate(class, ObjectBody::Method(method)))
    }

    /// Install `class>>selector` with the given body.
    pub fn install_method(&mut self, class: ClassRef, selector: &str, method: Value) {
        let selector = self.intern(selector);
        if let Some(object) = method.as_ref() {
            if let Ok(heap) = self.memory.get_mut(object) {
                if let ObjectBody::Method(m) = &mut heap.body {
                    m.selector = selector;
                    m.holder = Some(class);
                }
            }
        }
        self.memory.class_mut(class).add_method(selector, method);
    }

    pub fn install_primitive_method(&mut self, class: ClassRef, selector: &str, num_args: u8, primitive: u16) -> Value {
        let header = MethodHeader {
            num_args,
            num_temps: num_args,
            num_literals: 0,
            primitive: Some(primitive),
            large_frame: false,
        };
        let method = self.new_method(header, Vec::new(), Vec::new(), Value::NIL);
        self.install_method(class, selector, method);
        method
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_has_one_list_per_priority() {
        let settings = VmSettings {
            priority_levels: 8,
            ..VmSettings::default()
        };
        let vm = bootstrap(settings).unwrap();
        let lists = vm
            .memory
            .at(vm.scheduler, scheduler_fields::PROCESS_LISTS)
            .unwrap()
            .as_ref()
            .unwrap();
        assert_eq!(vm.memory.size(lists).unwrap(), 8);
        let active = vm.memory.at(vm.scheduler, scheduler_fields::ACTIVE_PROCESS).unwrap();
        assert!(active.is_nil());
    }

    #[test]
    fn zero_priority_levels_are_rejected() {
        let settings = VmSettings {
            priority_levels: 0,
            ..VmSettings::default()
        };
        assert!(matches!(bootstrap(settings), Err(VmError::InvalidSettings(_))));
    }

    #[test]
    fn kernel_selectors_are_installed() {
        let mut vm = bootstrap(VmSettings::default()).unwrap();
        let wait = vm.intern("wait");
        let method = vm.memory.class(vm.specials.semaphore).local_method(wait).unwrap();
        let method = vm.memory.method(method.as_ref().unwrap()).unwrap();
        assert_eq!(method.primitive(), Some(86));
        assert_eq!(method.holder, Some(vm.specials.semaphore));
    }
}
