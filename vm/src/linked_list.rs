//! Process lists threaded through the processes' `nextLink` field.
use object::{ObjectRef, Value};

use crate::scheduler::process_fields;
use crate::{Vm, VmError};

pub mod linked_list_fields {
    pub const FIRST_LINK: usize = 0;
    pub const LAST_LINK: usize = 1;
    pub const INST_SIZE: usize = 2;
}

use linked_list_fields::*;

impl Vm {
    pub fn is_empty_list(&self, list: ObjectRef) -> Result<bool, VmError> {
        Ok(self.memory.at(list, FIRST_LINK)?.is_nil())
    }

    /// Append `process` and record `list` as its list.
    pub fn add_last_link(&mut self, list: ObjectRef, process: ObjectRef) -> Result<(), VmError> {
        let link = Value::from_ref(process);
        match self.memory.at(list, LAST_LINK)?.as_ref() {
            None => self.memory.put(list, FIRST_LINK, link)?,
            Some(last) => self.memory.put(last, process_fields::NEXT_LINK, link)?,
        }
        self.memory.put(list, LAST_LINK, link)?;
        self.memory.put(process, process_fields::NEXT_LINK, Value::NIL)?;
        self.memory.put(process, process_fields::MY_LIST, Value::from_ref(list))?;
        Ok(())
    }

    /// Detach and answer the head of `list`.
    pub fn remove_first_link(&mut self, list: ObjectRef) -> Result<Option<ObjectRef>, VmError> {
        let Some(first) = self.memory.at(list, FIRST_LINK)?.as_ref() else {
            return Ok(None);
        };
        let last = self.memory.at(list, LAST_LINK)?;
        if last == Value::from_ref(first) {
            self.memory.put(list, FIRST_LINK, Value::NIL)?;
            self.memory.put(list, LAST_LINK, Value::NIL)?;
        } else {
            let next = self.memory.at(first, process_fields::NEXT_LINK)?;
            self.memory.put(list, FIRST_LINK, next)?;
        }
        self.detach(first)?;
        Ok(Some(first))
    }

    /// Unlink `process` wherever it sits in `list`. Answers `false` if it
    /// was not there.
    pub fn remove_link(&mut self, list: ObjectRef, process: ObjectRef) -> Result<bool, VmError> {
        let target = Value::from_ref(process);
        let mut previous: Option<ObjectRef> = None;
        let mut current = self.memory.at(list, FIRST_LINK)?;
        while let Some(link) = current.as_ref() {
            let next = self.memory.at(link, process_fields::NEXT_LINK)?;
            if current == target {
                match previous {
                    None => self.memory.put(list, FIRST_LINK, next)?,
                    Some(previous) => self.memory.put(previous, process_fields::NEXT_LINK, next)?,
                }
                if self.memory.at(list, LAST_LINK)? == target {
                    let last = previous.map_or(Value::NIL, Value::from_ref);
                    self.memory.put(list, LAST_LINK, last)?;
                }
                self.detach(process)?;
                return Ok(true);
            }
            previous = Some(link);
            current = next;
        }
        Ok(false)
    }

    fn detach(&mut self, process: ObjectRef) -> Result<(), VmError> {
        self.memory.put(process, process_fields::NEXT_LINK, Value::NIL)?;
        self.memory.put(process, process_fields::MY_LIST, Value::NIL)?;
        Ok(())
    }

    /// The members of `list`, head first.
    pub fn list_members(&self, list: ObjectRef) -> Result<Vec<ObjectRef>, VmError> {
        let mut members = Vec::new();
        let mut current = self.memory.at(list, FIRST_LINK)?;
        while let Some(link) = current.as_ref() {
            members.push(link);
            current = self.memory.at(link, process_fields::NEXT_LINK)?;
        }
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{VmSettings, bootstrap};

    fn processes(vm: &mut Vm, count: usize) -> Vec<ObjectRef> {
        (0..count)
            .map(|_| vm.memory.instantiate(vm.specials.process, 0).unwrap())
            .collect()
    }

    #[test]
    fn fifo_order() {
        let mut vm = bootstrap(VmSettings::default()).unwrap();
        let list = vm.memory.instantiate(vm.specials.linked_list, 0).unwrap();
        let p = processes(&mut vm, 3);
        for &process in &p {
            vm.add_last_link(list, process).unwrap();
        }
        assert_eq!(vm.list_members(list).unwrap(), p);
        assert_eq!(
            vm.memory.at(p[1], process_fields::MY_LIST).unwrap(),
            Value::from_ref(list)
        );
        assert_eq!(vm.remove_first_link(list).unwrap(), Some(p[0]));
        assert_eq!(vm.remove_first_link(list).unwrap(), Some(p[1]));
        assert_eq!(vm.remove_first_link(list).unwrap(), Some(p[2]));
        assert_eq!(vm.remove_first_link(list).unwrap(), None);
        assert!(vm.is_empty_list(list).unwrap());
        assert!(vm.memory.at(p[2], process_fields::MY_LIST).unwrap().is_nil());
    }

    #[test]
    fn remove_from_middle_and_tail() {
        let mut vm = bootstrap(VmSettings::default()).unwrap();
        let list = vm.memory.instantiate(vm.specials.linked_list, 0).unwrap();
        let p = processes(&mut vm, 3);
        for &process in &p {
            vm.add_last_link(list, process).unwrap();
        }
        assert!(vm.remove_link(list, p[1]).unwrap());
        assert!(vm.remove_link(list, p[2]).unwrap());
        assert!(!vm.remove_link(list, p[2]).unwrap());
        assert_eq!(vm.list_members(list).unwrap(), vec![p[0]]);
        vm.add_last_link(list, p[2]).unwrap();
        assert_eq!(vm.list_members(list).unwrap(), vec![p[0], p[2]]);
    }
}
